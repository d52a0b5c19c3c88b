//! End-to-end lookup: authorize, connect, search, inspect newest first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::credentials::{CredentialSource, StaticCredential};
use crate::domains::{domain_of, normalize_address, DomainGate, DomainStore};
use crate::error::{Error, Result};
use crate::extract::{Artifact, ArtifactExtractor, ExtractionResult};
use crate::freshness::FreshnessValidator;
use crate::imap::{ImapConnector, SessionLease, SessionManager};
use crate::matcher;
use crate::message::CandidateMessage;
use crate::search::CriteriaBuilder;
use crate::transport::{Connector, MailTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalState {
    Unauthorized,
    Connecting,
    Searching,
    NoCandidates,
    Inspecting,
    Found,
    Exhausted,
    Failed,
}

impl RetrievalState {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            RetrievalState::Connecting | RetrievalState::Searching | RetrievalState::Inspecting
        )
    }
}

/// A completed lookup. "Nothing found" is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Found {
        artifact: Artifact,
        message_date: DateTime<Utc>,
        remaining_validity_seconds: i64,
    },
    NoCandidates,
    Exhausted {
        /// A message for this recipient existed but was past its validity.
        expired_found: bool,
        /// A provider message existed but was addressed to someone else.
        recipient_mismatch_found: bool,
    },
}

impl RetrievalOutcome {
    pub fn state(&self) -> RetrievalState {
        match self {
            RetrievalOutcome::Found { .. } => RetrievalState::Found,
            RetrievalOutcome::NoCandidates => RetrievalState::NoCandidates,
            RetrievalOutcome::Exhausted { .. } => RetrievalState::Exhausted,
        }
    }

    /// Caller-facing explanation. Expired wins over recipient mismatch.
    pub fn guidance(&self) -> &'static str {
        match self {
            RetrievalOutcome::Found { .. } => "Valid code found",
            RetrievalOutcome::NoCandidates => "No provider emails found for this account",
            RetrievalOutcome::Exhausted {
                expired_found: true,
                ..
            } => "Codes were found but have expired. Request a new code.",
            RetrievalOutcome::Exhausted {
                recipient_mismatch_found: true,
                ..
            } => "The address does not match any recipient",
            RetrievalOutcome::Exhausted { .. } => "No valid codes found for this address",
        }
    }
}

/// Why a lookup could not complete. Never carries artifact content.
#[derive(Debug, Error)]
pub enum FailureReason {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("domain {domain} is not authorized")]
    Unauthorized { domain: String },
    #[error("{error}")]
    Failed { retryable: bool, error: Error },
}

impl FailureReason {
    pub fn state(&self) -> RetrievalState {
        match self {
            FailureReason::InvalidAddress(_) | FailureReason::Unauthorized { .. } => {
                RetrievalState::Unauthorized
            }
            FailureReason::Failed { .. } => RetrievalState::Failed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::Failed { retryable: true, .. })
    }

    fn failed(error: Error) -> Self {
        FailureReason::Failed {
            retryable: error.is_retryable(),
            error,
        }
    }
}

#[derive(Default)]
struct ScanFlags {
    expired_found: bool,
    recipient_mismatch_found: bool,
}

pub struct Engine<C: Connector> {
    config: EngineConfig,
    sessions: SessionManager<C>,
    gate: DomainGate,
    criteria: CriteriaBuilder,
    freshness: FreshnessValidator,
    extractor: ArtifactExtractor,
    subject_keywords: Vec<String>,
}

pub type ImapEngine = Engine<ImapConnector>;

impl ImapEngine {
    /// Engine backed by the real IMAP connector. An inline
    /// `mailbox.password` takes precedence over `credentials`.
    pub async fn with_imap(
        config: EngineConfig,
        credentials: Arc<dyn CredentialSource>,
        domain_store: Arc<dyn DomainStore>,
    ) -> Result<Self> {
        let credentials = mailbox_credentials(&config, credentials);
        let connector = ImapConnector::new(
            config.mailbox.clone(),
            credentials,
            config.session.command_timeout(),
        );
        Self::new(config, connector, domain_store).await
    }
}

impl<C: Connector> Engine<C> {
    /// Validates the config and loads the authorized-domain set once.
    pub async fn new(
        mut config: EngineConfig,
        connector: C,
        domain_store: Arc<dyn DomainStore>,
    ) -> Result<Self> {
        config.validate()?;
        let gate = DomainGate::load(domain_store).await?;
        let freshness = FreshnessValidator::from_config(&config.validity)?;
        let extractor = ArtifactExtractor::new(&config.provider);
        let criteria = CriteriaBuilder::new(
            config.provider.sender.clone(),
            config.search.forward_subject_marker.clone(),
        );
        let sessions = SessionManager::new(connector, &config.session);
        let subject_keywords = config
            .matching
            .subject_keywords
            .iter()
            .map(|k| fold(k))
            .filter(|k| !k.is_empty())
            .collect();
        Ok(Self {
            config,
            sessions,
            gate,
            criteria,
            freshness,
            extractor,
            subject_keywords,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn domains(&self) -> &DomainGate {
        &self.gate
    }

    /// Finds the newest valid artifact addressed to `target`.
    ///
    /// Dropping the returned future aborts in-flight I/O and discards the
    /// mailbox session.
    pub async fn retrieve_artifact(
        &self,
        target: &str,
    ) -> std::result::Result<RetrievalOutcome, FailureReason> {
        let address = normalize_address(target).map_err(|_| {
            warn!("Invalid address format: {}", target);
            FailureReason::InvalidAddress(target.trim().to_string())
        })?;
        let domain = domain_of(&address).unwrap_or_default().to_string();

        if !self.gate.is_authorized(&address).await {
            info!(state = ?RetrievalState::Unauthorized, "Domain {} not authorized", domain);
            return Err(FailureReason::Unauthorized { domain });
        }

        info!(email = %address, state = ?RetrievalState::Connecting, "Looking up artifact");
        let mut lease = self.sessions.acquire().await.map_err(|e| {
            warn!(state = ?RetrievalState::Failed, "Mailbox connection failed: {}", e);
            FailureReason::failed(e)
        })?;

        debug!(state = ?RetrievalState::Searching);
        let uids = match self.search(&mut lease).await {
            Ok(uids) => uids,
            Err(e) => return Err(self.abort(lease, e).await),
        };
        if uids.is_empty() {
            info!(email = %address, state = ?RetrievalState::NoCandidates, "No candidate messages");
            self.sessions.release(lease);
            return Ok(RetrievalOutcome::NoCandidates);
        }

        debug!(state = ?RetrievalState::Inspecting, "Inspecting {} candidate(s)", uids.len());
        let now = Utc::now();
        let mut flags = ScanFlags::default();
        for uid in uids {
            let raw = match lease.fetch(uid).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(uid, "Message vanished before fetch");
                    continue;
                }
                Err(Error::MalformedMessage { uid, reason }) => {
                    warn!(uid, "Skipping malformed message: {}", reason);
                    continue;
                }
                Err(e) => return Err(self.abort(lease, e).await),
            };
            let message = match CandidateMessage::parse(uid, raw) {
                Ok(message) => message,
                Err(e) => {
                    warn!(uid, "Skipping message: {}", e);
                    continue;
                }
            };
            if let Some(outcome) = self.inspect(&message, &address, &domain, now, &mut flags) {
                info!(email = %address, uid, state = ?RetrievalState::Found, "Artifact found");
                self.sessions.release(lease);
                return Ok(outcome);
            }
        }

        self.sessions.release(lease);
        let outcome = RetrievalOutcome::Exhausted {
            expired_found: flags.expired_found,
            recipient_mismatch_found: flags.recipient_mismatch_found,
        };
        info!(
            email = %address,
            state = ?RetrievalState::Exhausted,
            expired = flags.expired_found,
            mismatch = flags.recipient_mismatch_found,
            "No valid artifact"
        );
        Ok(outcome)
    }

    /// Opens a fresh session, selects the mailbox and logs out.
    pub async fn test_connection(&self) -> Result<()> {
        self.sessions.probe(&self.config.mailbox.mailbox).await?;
        info!("Connection test succeeded for {}", self.sessions.identity());
        Ok(())
    }

    /// Logs out the cached mailbox session.
    pub async fn shutdown(&self) {
        self.sessions.disconnect().await;
    }

    /// Newest first (highest UID), capped at `max_candidates`.
    async fn search(&self, lease: &mut SessionLease<C::Transport>) -> Result<Vec<u32>> {
        lease.select_mailbox(&self.config.mailbox.mailbox).await?;
        let search = &self.config.search;
        let query = self.criteria.build(
            Utc::now(),
            search.lookback_minutes,
            search.from_filter.as_deref(),
            search.subject_filter.as_deref(),
        );
        let query = query.to_imap();
        debug!("Search criteria: {}", query);
        let mut uids = lease.search(&query).await?;
        uids.sort_unstable_by(|a, b| b.cmp(a));
        uids.dedup();
        uids.truncate(search.max_candidates);
        Ok(uids)
    }

    /// Runs one candidate through recipient, subject, freshness and
    /// extraction checks.
    fn inspect(
        &self,
        message: &CandidateMessage,
        address: &str,
        domain: &str,
        now: DateTime<Utc>,
        flags: &mut ScanFlags,
    ) -> Option<RetrievalOutcome> {
        let uid = message.uid();
        let direct = matcher::matches_direct(message, address);
        let forwarded = !direct
            && self.config.matching.forwarded
            && matcher::matches_forwarded(message, domain);
        if !direct && !forwarded {
            debug!(uid, "Recipient mismatch: {:?}", message.to());
            flags.recipient_mismatch_found = true;
            return None;
        }

        if !self.subject_allowed(message.subject()) {
            debug!(uid, "Subject not accepted: {:?}", message.subject());
            return None;
        }

        let (valid, sent) = self.freshness.is_valid(message, now);
        let sent = match (valid, sent) {
            (true, Some(sent)) => sent,
            (_, Some(_)) => {
                debug!(uid, "Message expired");
                flags.expired_found = true;
                return None;
            }
            (_, None) => {
                warn!(uid, "Missing or unparsable Date header: {:?}", message.date());
                return None;
            }
        };

        let body = message.body();
        if body.is_empty() {
            debug!(uid, "Empty body");
            return None;
        }
        debug!(uid, kind = ?body.kind(), "Body decoded");

        let order = self.extractor.order_for_subject(message.subject());
        let remaining = self.freshness.remaining_secs(sent, now);
        let link_domain = &self.config.provider.link_domain;
        match self
            .extractor
            .extract_ordered(order, body.as_str(), link_domain, remaining)
        {
            ExtractionResult::Found(artifact) => Some(RetrievalOutcome::Found {
                artifact,
                message_date: sent,
                remaining_validity_seconds: remaining,
            }),
            ExtractionResult::NotFound => {
                debug!(uid, "No artifact in message");
                None
            }
        }
    }

    fn subject_allowed(&self, subject: Option<&str>) -> bool {
        if self.subject_keywords.is_empty() {
            return true;
        }
        let subject = fold(subject.unwrap_or_default());
        self.subject_keywords.iter().any(|k| subject.contains(k.as_str()))
    }

    /// Mailbox-level failure: drop the session and report.
    async fn abort(&self, lease: SessionLease<C::Transport>, error: Error) -> FailureReason {
        warn!(state = ?RetrievalState::Failed, "Retrieval failed: {}", error);
        self.sessions.invalidate(lease).await;
        FailureReason::failed(error)
    }
}

fn mailbox_credentials(
    config: &EngineConfig,
    fallback: Arc<dyn CredentialSource>,
) -> Arc<dyn CredentialSource> {
    match config.mailbox.password.as_deref() {
        Some(password) if !password.is_empty() => Arc::new(StaticCredential::new(password)),
        _ => fallback,
    }
}

/// Lower-cases and strips the accents common in the provider's subjects.
fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}
