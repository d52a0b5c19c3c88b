//! Error types for the retrieval engine.

use thiserror::Error;

#[derive(Debug, Error)]
/// Error type for every engine operation.
pub enum Error {
    /// The requested address is not shaped like `local@domain.tld`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// DNS, TCP or TLS failure while reaching the mailbox server.
    #[error("connection error: {0}")]
    Connection(String),
    /// A transport step exceeded its configured bound.
    #[error("timed out during {0}")]
    TransportTimeout(&'static str),
    /// The server rejected the stored credential.
    #[error("authentication failed for {account}: {reason}")]
    AuthenticationFailure { account: String, reason: String },
    /// A mailbox command (SELECT, SEARCH, FETCH, NOOP) failed.
    #[error("mailbox command failed: {0}")]
    Protocol(String),
    /// A single fetched message could not be parsed.
    #[error("malformed message uid={uid}: {reason}")]
    MalformedMessage { uid: u32, reason: String },
    /// No credential could be resolved for the mailbox.
    #[error("credential unavailable: {0}")]
    Credential(String),
    /// Authorized-domain persistence failed.
    #[error("domain store error: {0}")]
    Store(String),
    /// Configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller may retry the same request unchanged.
    /// Authentication failures never are; they need a credential fix first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::TransportTimeout(_) | Error::Protocol(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::Connection("reset".into()).is_retryable());
        assert!(Error::TransportTimeout("search").is_retryable());
        assert!(Error::Protocol("BAD".into()).is_retryable());
    }

    #[test]
    fn auth_and_config_errors_are_not_retryable() {
        let auth = Error::AuthenticationFailure {
            account: "box@example.com".into(),
            reason: "NO [AUTHENTICATIONFAILED]".into(),
        };
        assert!(!auth.is_retryable());
        assert!(!Error::InvalidAddress("nobody".into()).is_retryable());
        assert!(!Error::Config("port".into()).is_retryable());
    }
}
