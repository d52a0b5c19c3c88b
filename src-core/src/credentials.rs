//! Credential lookup for the central mailbox.

use crate::error::{Error, Result};

/// Resolves the secret used to authenticate a mailbox identity.
pub trait CredentialSource: Send + Sync {
    fn credential(&self, identity: &str) -> Result<String>;
}

/// Reads the secret from the first non-empty environment variable in a list.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    vars: Vec<String>,
}

impl EnvCredentials {
    pub fn new<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(["MAILCODE_IMAP_PASSWORD", "GMAIL_APP_PASSWORD"])
    }
}

impl CredentialSource for EnvCredentials {
    fn credential(&self, identity: &str) -> Result<String> {
        self.vars
            .iter()
            .find_map(|var| {
                std::env::var(var)
                    .ok()
                    .filter(|s| !s.is_empty() && s != "undefined")
            })
            .ok_or_else(|| {
                Error::Credential(format!(
                    "no password for {} (set one of {})",
                    identity,
                    self.vars.join(", ")
                ))
            })
    }
}

/// A fixed secret, typically the inline `mailbox.password` setting.
#[derive(Clone)]
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCredential([REDACTED])")
    }
}

impl CredentialSource for StaticCredential {
    fn credential(&self, _identity: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
