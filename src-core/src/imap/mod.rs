pub mod pool;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_native_tls::TlsConnector;
use async_std::net::TcpStream;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::credentials::CredentialSource;
use crate::error::{Error, Result};
use crate::transport::{Connector, MailTransport};

pub use pool::{SessionLease, SessionManager};

pub type ImapStream = async_native_tls::TlsStream<TcpStream>;

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ── Connector ───────────────────────────────────────────────────────────────

/// Opens authenticated IMAP-over-TLS sessions to the central mailbox.
pub struct ImapConnector {
    config: MailboxConfig,
    credentials: Arc<dyn CredentialSource>,
    command_timeout: Duration,
}

impl ImapConnector {
    pub fn new(
        config: MailboxConfig,
        credentials: Arc<dyn CredentialSource>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            config,
            credentials,
            command_timeout,
        }
    }

}

#[async_trait]
impl Connector for ImapConnector {
    type Transport = ImapSession;

    async fn connect(&self) -> Result<ImapSession> {
        let password = self.credentials.credential(&self.config.identity())?;
        let inner = create_imap_session(&self.config, &password).await?;
        Ok(ImapSession {
            inner,
            command_timeout: self.command_timeout,
        })
    }

    fn identity(&self) -> String {
        self.config.identity()
    }
}

// ── Connection creation ─────────────────────────────────────────────────────

async fn create_imap_session(
    config: &MailboxConfig,
    password: &str,
) -> Result<async_imap::Session<ImapStream>> {
    let addr = format!("{}:{}", config.host, config.port);

    info!("[IMAP] Connecting to {}", addr);

    // IPv4 only; some providers hang on IPv6
    use async_std::net::ToSocketAddrs;
    let addrs: Vec<std::net::SocketAddr> = addr
        .to_socket_addrs()
        .await
        .map_err(|e| Error::Connection(format!("DNS resolve failed for {}: {}", addr, e)))?
        .filter(|a| a.is_ipv4())
        .collect();

    if addrs.is_empty() {
        return Err(Error::Connection(format!(
            "No IPv4 address found for {}",
            config.host
        )));
    }

    debug!("[IMAP] DNS resolved to {:?}", addrs);

    let tcp = async_std::io::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(&addrs[..]))
        .await
        .map_err(|e| Error::Connection(format!("TCP connect to {} failed: {}", addr, e)))?;

    debug!("[IMAP] TCP connected, starting TLS handshake...");

    let tls_stream = TlsConnector::new()
        .connect(&config.host, tcp)
        .await
        .map_err(|e| Error::Connection(format!("TLS handshake with {} failed: {}", config.host, e)))?;

    debug!("[IMAP] TLS established, authenticating...");

    let client = async_imap::Client::new(tls_stream);
    let session = client
        .login(&config.email, password)
        .await
        .map_err(|(e, _)| match e {
            async_imap::error::Error::Io(io) => {
                Error::Connection(format!("connection dropped during login: {}", io))
            }
            async_imap::error::Error::ConnectionLost => {
                Error::Connection("connection lost during login".to_string())
            }
            other => Error::AuthenticationFailure {
                account: config.email.clone(),
                reason: other.to_string(),
            },
        })?;

    info!("[IMAP] Session established for {}", config.email);
    Ok(session)
}

// ── Session ─────────────────────────────────────────────────────────────────

/// An authenticated IMAP session whose every command is time-bounded.
pub struct ImapSession {
    inner: async_imap::Session<ImapStream>,
    command_timeout: Duration,
}

async fn bounded<T, F>(limit: Duration, step: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, async_imap::error::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(map_command_error(step, e)),
        Err(_) => Err(Error::TransportTimeout(step)),
    }
}

fn map_command_error(step: &str, e: async_imap::error::Error) -> Error {
    match e {
        async_imap::error::Error::Io(io) => Error::Connection(format!("{} failed: {}", step, io)),
        async_imap::error::Error::ConnectionLost => {
            Error::Connection(format!("connection lost during {}", step))
        }
        other => Error::Protocol(format!("{} failed: {}", step, other)),
    }
}

/// A response that cannot be parsed spoils only this message; anything else
/// is a mailbox-level failure.
fn map_fetch_error(uid: u32, e: async_imap::error::Error) -> Error {
    match e {
        async_imap::error::Error::Parse(parse) => Error::MalformedMessage {
            uid,
            reason: parse.to_string(),
        },
        other => map_command_error("fetch", other),
    }
}

#[async_trait]
impl MailTransport for ImapSession {
    async fn select_mailbox(&mut self, mailbox: &str) -> Result<()> {
        let selected = bounded(self.command_timeout, "select", self.inner.select(mailbox)).await?;
        debug!("[IMAP] Selected {} ({} messages)", mailbox, selected.exists);
        Ok(())
    }

    async fn noop(&mut self) -> Result<()> {
        bounded(self.command_timeout, "noop", self.inner.noop()).await
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let uids = bounded(self.command_timeout, "search", self.inner.uid_search(query)).await?;
        Ok(uids.into_iter().collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let inner = &mut self.inner;
        let fetch_all = async move {
            let stream = inner
                .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
                .await
                .map_err(|e| map_fetch_error(uid, e))?;
            stream
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .map(|item| item.map_err(|e| map_fetch_error(uid, e)))
                .collect::<Result<Vec<Fetch>>>()
        };
        let fetches = tokio::time::timeout(self.command_timeout, fetch_all)
            .await
            .map_err(|_| Error::TransportTimeout("fetch"))??;

        Ok(fetches
            .iter()
            .find_map(|fetch| fetch.body().map(|body| body.to_vec())))
    }

    async fn logout(&mut self) -> Result<()> {
        bounded(self.command_timeout, "logout", self.inner.logout())
            .await
            .map_err(|e| {
                warn!("[IMAP] Logout failed: {}", e);
                e
            })
    }
}
