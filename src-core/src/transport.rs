//! The mail transport seam.
//!
//! The engine never talks to a socket directly: it drives a [`MailTransport`]
//! obtained from a [`Connector`]. The IMAP implementation lives in
//! [`crate::imap`]; tests substitute a scripted one.

use async_trait::async_trait;

use crate::error::Result;

/// One open, authenticated connection to a mailbox.
///
/// Implementations are stateful (the selected mailbox is connection state) and
/// must not be driven by two callers at once.
#[async_trait]
pub trait MailTransport: Send {
    async fn select_mailbox(&mut self, mailbox: &str) -> Result<()>;

    /// Protocol no-op used as a liveness probe.
    async fn noop(&mut self) -> Result<()>;

    /// Runs a protocol-level search and returns the matching UIDs.
    async fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    /// Fetches the full RFC 822 bytes of one message, `None` if it vanished.
    async fn fetch(&mut self, uid: u32) -> Result<Option<Vec<u8>>>;

    async fn logout(&mut self) -> Result<()>;
}

/// Opens new transports: resolve, connect, negotiate TLS, authenticate.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: MailTransport + 'static;

    async fn connect(&self) -> Result<Self::Transport>;

    /// Identity of the mailbox this connector reaches (server + account).
    fn identity(&self) -> String;
}
