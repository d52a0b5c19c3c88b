use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Seconds a verification artifact stays usable after the provider sends it.
pub const CODE_VALIDITY_SECONDS: i64 = 900;

/// Upper bound on `search.lookback_minutes` (one week).
pub const MAX_LOOKBACK_MINUTES: i64 = 7 * 24 * 60;
/// Upper bound on `validity.code_validity_secs` (one day).
pub const MAX_CODE_VALIDITY_SECONDS: i64 = 24 * 60 * 60;

pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_MAILBOX: &str = "INBOX";

// ── Mailbox ─────────────────────────────────────────────────────────────────

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    /// Central mailbox account; also the login user.
    pub email: String,
    /// Inline password. When absent the credential source is consulted.
    pub password: Option<String>,
    pub mailbox: String,
}

impl MailboxConfig {
    /// Identity of the cached session: "email@host:port".
    pub fn identity(&self) -> String {
        format!("{}@{}:{}", self.email, self.host, self.port)
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_IMAP_HOST.to_string(),
            port: DEFAULT_IMAP_PORT,
            email: String::new(),
            password: None,
            mailbox: DEFAULT_MAILBOX.to_string(),
        }
    }
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// A warm session idle for longer than this is closed and replaced.
    pub reuse_window_secs: u64,
    /// Bound on DNS + TCP + TLS + login.
    pub connect_timeout_secs: u64,
    /// Bound on every individual mailbox command.
    pub command_timeout_secs: u64,
}

impl SessionConfig {
    pub fn reuse_window(&self) -> Duration {
        Duration::from_secs(self.reuse_window_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reuse_window_secs: 300,
            connect_timeout_secs: 60,
            command_timeout_secs: 30,
        }
    }
}

// ── Search ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub lookback_minutes: i64,
    /// Sender filter. `None` widens the search to provider-or-forwarded mail.
    pub from_filter: Option<String>,
    pub subject_filter: Option<String>,
    pub forward_subject_marker: String,
    pub max_candidates: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 20,
            from_filter: Some(ProviderProfile::default().sender),
            subject_filter: None,
            forward_subject_marker: "Fwd:".to_string(),
            max_candidates: 50,
        }
    }
}

// ── Validity ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidityConfig {
    pub code_validity_secs: i64,
    /// Offset applied to `Date` headers that carry no zone, e.g. "-05:00".
    pub utc_offset: String,
}

impl ValidityConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset
            .parse::<FixedOffset>()
            .map_err(|e| Error::Config(format!("invalid utc_offset {:?}: {}", self.utc_offset, e)))
    }
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            code_validity_secs: CODE_VALIDITY_SECONDS,
            utc_offset: "+00:00".to_string(),
        }
    }
}

// ── Matching ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Accept mail forwarded on behalf of the target's domain.
    pub forwarded: bool,
    /// When non-empty, a candidate's subject must contain one of these.
    pub subject_keywords: Vec<String>,
}

// ── Provider ────────────────────────────────────────────────────────────────

/// Everything the extractor knows about the provider's mail templates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderProfile {
    pub name: String,
    pub sender: String,
    /// Every accepted action link must contain this in its href.
    pub link_domain: String,
    pub accent_color: String,
    pub link_phrases: Vec<String>,
    pub link_classes: Vec<String>,
    pub link_keywords: Vec<String>,
    pub code_container_tokens: Vec<String>,
    /// Subjects of button-driven templates; these run link extraction first.
    pub link_first_subjects: Vec<String>,
}

impl Default for ProviderProfile {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            name: "Netflix".to_string(),
            sender: "info@account.netflix.com".to_string(),
            link_domain: "netflix.com".to_string(),
            accent_color: "#e50914".to_string(),
            link_phrases: strings(&["Obtener código", "Get code", "Sí, la envié yo", "Yes, it was me"]),
            link_classes: strings(&["get-code"]),
            link_keywords: strings(&["codigo", "código", "code", "verify", "confirm"]),
            code_container_tokens: strings(&["code", "codigo", "verification", "pin"]),
            link_first_subjects: strings(&[
                "acceso temporal",
                "temporary access",
                "hogar",
                "household",
            ]),
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mailbox: MailboxConfig,
    pub session: SessionConfig,
    pub search: SearchConfig,
    pub validity: ValidityConfig,
    pub matching: MatchingConfig,
    pub provider: ProviderProfile,
    pub domains_file: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_json(data: &str) -> Result<Self> {
        let mut config: EngineConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects unusable settings and clamps the ones that have a sane floor.
    pub fn validate(&mut self) -> Result<()> {
        if self.mailbox.host.trim().is_empty() {
            return Err(Error::Config("mailbox.host is empty".to_string()));
        }
        if self.mailbox.port == 0 {
            return Err(Error::Config("mailbox.port must be non-zero".to_string()));
        }
        if self.mailbox.mailbox.trim().is_empty() {
            tracing::warn!("mailbox.mailbox is empty, using {}", DEFAULT_MAILBOX);
            self.mailbox.mailbox = DEFAULT_MAILBOX.to_string();
        }
        if self.session.connect_timeout_secs == 0 || self.session.command_timeout_secs == 0 {
            return Err(Error::Config("session timeouts must be non-zero".to_string()));
        }
        if !(1..=MAX_LOOKBACK_MINUTES).contains(&self.search.lookback_minutes) {
            return Err(Error::Config(format!(
                "search.lookback_minutes must be between 1 and {}",
                MAX_LOOKBACK_MINUTES
            )));
        }
        let search_terms = [
            ("search.from_filter", self.search.from_filter.as_deref()),
            ("search.subject_filter", self.search.subject_filter.as_deref()),
            ("search.forward_subject_marker", Some(self.search.forward_subject_marker.as_str())),
        ];
        for (name, term) in search_terms {
            if term.is_some_and(|t| !t.is_ascii()) {
                return Err(Error::Config(format!(
                    "{} must be ASCII; use matching.subject_keywords for accented text",
                    name
                )));
            }
        }
        if self.search.max_candidates == 0 {
            tracing::warn!("search.max_candidates was 0. Setting to 1.");
            self.search.max_candidates = 1;
        }
        if !(1..=MAX_CODE_VALIDITY_SECONDS).contains(&self.validity.code_validity_secs) {
            return Err(Error::Config(format!(
                "validity.code_validity_secs must be between 1 and {}",
                MAX_CODE_VALIDITY_SECONDS
            )));
        }
        self.validity.offset()?;
        if self.provider.link_domain.trim().is_empty() {
            return Err(Error::Config("provider.link_domain is empty".to_string()));
        }
        let lookback_secs = self.search.lookback_minutes.checked_mul(60).unwrap_or(i64::MAX);
        if lookback_secs < self.validity.code_validity_secs {
            tracing::warn!(
                "Lookback window ({} min) is shorter than the validity window ({}s); valid codes may be missed.",
                self.search.lookback_minutes,
                self.validity.code_validity_secs
            );
        }
        Ok(())
    }
}
