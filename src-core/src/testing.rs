//! Scripted mailbox used by unit tests in place of a live IMAP server.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::transport::{Connector, MailTransport};

#[derive(Default)]
pub(crate) struct Counters {
    connects: AtomicUsize,
    selects: AtomicUsize,
    noops: AtomicUsize,
    searches: AtomicUsize,
    fetches: AtomicUsize,
    logouts: AtomicUsize,
}

impl Counters {
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    pub(crate) fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }
    pub(crate) fn noops(&self) -> usize {
        self.noops.load(Ordering::SeqCst)
    }
    pub(crate) fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
    pub(crate) fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Every call that would have touched the network.
    pub(crate) fn total(&self) -> usize {
        self.connects()
            + self.selects()
            + self.noops()
            + self.searches()
            + self.fetches()
            + self.logouts()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ConnectFailure {
    Auth,
    Refused,
    Hang,
}

#[derive(Clone, Default)]
pub(crate) struct FakeMailbox {
    counters: Arc<Counters>,
    messages: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    queries: Arc<Mutex<Vec<String>>>,
    connect_failure: Arc<Mutex<Option<ConnectFailure>>>,
    noop_fails: Arc<AtomicBool>,
    search_times_out: Arc<AtomicBool>,
    malformed_uids: Arc<Mutex<Vec<u32>>>,
    disconnect_uids: Arc<Mutex<Vec<u32>>>,
}

impl FakeMailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn connector(&self) -> FakeConnector {
        FakeConnector(self.clone())
    }

    pub(crate) fn push(&self, uid: u32, raw: Vec<u8>) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((uid, raw));
        }
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub(crate) fn set_connect_failure(&self, failure: Option<ConnectFailure>) {
        if let Ok(mut slot) = self.connect_failure.lock() {
            *slot = failure;
        }
    }

    pub(crate) fn set_noop_fails(&self, fails: bool) {
        self.noop_fails.store(fails, Ordering::SeqCst);
    }

    pub(crate) fn set_search_times_out(&self, times_out: bool) {
        self.search_times_out.store(times_out, Ordering::SeqCst);
    }

    /// Makes FETCH of `uid` fail the way a mid-stream parse error would.
    pub(crate) fn break_fetch(&self, uid: u32) {
        if let Ok(mut uids) = self.malformed_uids.lock() {
            uids.push(uid);
        }
    }

    /// Makes FETCH of `uid` fail as if the server hung up mid-stream.
    pub(crate) fn drop_connection_on_fetch(&self, uid: u32) {
        if let Ok(mut uids) = self.disconnect_uids.lock() {
            uids.push(uid);
        }
    }
}

pub(crate) struct FakeConnector(FakeMailbox);

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self) -> Result<FakeTransport> {
        self.0.counters.connects.fetch_add(1, Ordering::SeqCst);
        let failure = self.0.connect_failure.lock().ok().and_then(|f| *f);
        match failure {
            Some(ConnectFailure::Auth) => Err(Error::AuthenticationFailure {
                account: "central@example.net".into(),
                reason: "NO [AUTHENTICATIONFAILED] Invalid credentials".into(),
            }),
            Some(ConnectFailure::Refused) => Err(Error::Connection("connection refused".into())),
            Some(ConnectFailure::Hang) => {
                futures::future::pending::<()>().await;
                Err(Error::Connection("unreachable".into()))
            }
            None => Ok(FakeTransport(self.0.clone())),
        }
    }

    fn identity(&self) -> String {
        "central@example.net@imap.example.net:993".to_string()
    }
}

pub(crate) struct FakeTransport(FakeMailbox);

#[async_trait]
impl MailTransport for FakeTransport {
    async fn select_mailbox(&mut self, _mailbox: &str) -> Result<()> {
        self.0.counters.selects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn noop(&mut self) -> Result<()> {
        self.0.counters.noops.fetch_add(1, Ordering::SeqCst);
        if self.0.noop_fails.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection reset".into()));
        }
        Ok(())
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        self.0.counters.searches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.0.queries.lock() {
            queries.push(query.to_string());
        }
        if self.0.search_times_out.load(Ordering::SeqCst) {
            return Err(Error::TransportTimeout("search"));
        }
        let messages = self.0.messages.lock().map_err(|_| Error::Protocol("poisoned".into()))?;
        Ok(messages.iter().map(|(uid, _)| *uid).collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        self.0.counters.fetches.fetch_add(1, Ordering::SeqCst);
        let listed =
            |uids: &Mutex<Vec<u32>>| uids.lock().map(|u| u.contains(&uid)).unwrap_or(false);
        if listed(&*self.0.disconnect_uids) {
            return Err(Error::Connection("connection lost during fetch".into()));
        }
        if listed(&*self.0.malformed_uids) {
            return Err(Error::MalformedMessage {
                uid,
                reason: "unparseable FETCH response".into(),
            });
        }
        let messages = self.0.messages.lock().map_err(|_| Error::Protocol("poisoned".into()))?;
        Ok(messages
            .iter()
            .find(|(candidate, _)| *candidate == uid)
            .map(|(_, raw)| raw.clone()))
    }

    async fn logout(&mut self) -> Result<()> {
        self.0.counters.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds an RFC 822 message with a single HTML or plain-text body.
pub(crate) fn raw_message(
    to: &str,
    subject: &str,
    date: DateTime<Utc>,
    content_type: &str,
    body: &str,
) -> Vec<u8> {
    format!(
        "From: Netflix <info@account.netflix.com>\r\n\
To: {to}\r\n\
Subject: {subject}\r\n\
Date: {date}\r\n\
MIME-Version: 1.0\r\n\
Content-Type: {content_type}; charset=utf-8\r\n\
\r\n\
{body}",
        subject = encode_word(subject),
        date = date.to_rfc2822(),
    )
    .into_bytes()
}

/// RFC 2047 Q-encoding for non-ASCII header values.
fn encode_word(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let mut out = String::from("=?utf-8?Q?");
    for b in value.bytes() {
        match b {
            b' ' => out.push('_'),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => out.push(b as char),
            _ => out.push_str(&format!("={:02X}", b)),
        }
    }
    out.push_str("?=");
    out
}
