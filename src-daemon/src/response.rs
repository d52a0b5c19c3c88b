//! JSON envelopes printed by the CLI.

use chrono::{DateTime, Utc};
use mailcode_core::{Artifact, DomainMutation, FailureReason, RetrievalOutcome, RetrievalState};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Warning,
    Info,
    Error,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub has_code: bool,
    pub status: Status,
    pub state: RetrievalState,
    pub message: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl LookupResponse {
    fn empty(
        email: &str,
        status: Status,
        state: RetrievalState,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            has_code: false,
            status,
            state,
            message,
            email: email.to_string(),
            code: None,
            code_url: None,
            message_guid: None,
            expires_in_minutes: None,
            email_date: None,
            retryable: None,
            timestamp: now,
        }
    }

    pub fn from_outcome(email: &str, outcome: &RetrievalOutcome, now: DateTime<Utc>) -> Self {
        let status = match outcome {
            RetrievalOutcome::Found { .. } => Status::Success,
            RetrievalOutcome::NoCandidates => Status::Warning,
            RetrievalOutcome::Exhausted {
                expired_found: true,
                ..
            } => Status::Warning,
            RetrievalOutcome::Exhausted {
                recipient_mismatch_found: true,
                ..
            } => Status::Error,
            RetrievalOutcome::Exhausted { .. } => Status::Info,
        };
        let message = outcome.guidance().to_string();
        let mut response = Self::empty(email, status, outcome.state(), message, now);

        if let RetrievalOutcome::Found {
            artifact,
            message_date,
            remaining_validity_seconds,
        } = outcome
        {
            response.has_code = true;
            response.email_date = Some(*message_date);
            match artifact {
                Artifact::VerificationCode { code } => response.code = Some(code.clone()),
                Artifact::ActionLink(link) => {
                    response.code_url = Some(link.url.clone());
                    response.message_guid = link.message_guid.clone();
                }
            }
            response.expires_in_minutes = Some((remaining_validity_seconds / 60).max(1));
        }
        response
    }

    pub fn from_failure(email: &str, failure: &FailureReason, now: DateTime<Utc>) -> Self {
        let message = match failure {
            FailureReason::InvalidAddress(_) => "The email address format is not valid".to_string(),
            FailureReason::Unauthorized { domain } => {
                format!("Domain {} is not authorized to use this service", domain)
            }
            FailureReason::Failed { retryable: true, .. } => {
                "The mailbox is temporarily unavailable. Please try again.".to_string()
            }
            FailureReason::Failed { error, .. } => format!("Mailbox error: {}", error),
        };
        let mut response = Self::empty(email, Status::Error, failure.state(), message, now);
        response.retryable = Some(failure.is_retryable());
        response
    }
}

/// Envelope for `test-auth`.
#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub status: Status,
    pub message: String,
    pub email: String,
    pub imap_server: String,
    pub imap_port: u16,
    pub inbox_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Envelope for `domains add` / `domains remove`.
#[derive(Debug, Serialize)]
pub struct DomainResponse<'a> {
    pub status: Status,
    #[serde(flatten)]
    pub mutation: &'a DomainMutation,
    pub message: String,
}

impl<'a> DomainResponse<'a> {
    pub fn new(mutation: &'a DomainMutation) -> Self {
        let status = match mutation {
            DomainMutation::Added(_) | DomainMutation::Removed(_) => Status::Success,
            DomainMutation::AlreadyAuthorized(_) => Status::Info,
            DomainMutation::NotAuthorized(_) => Status::Warning,
        };
        Self {
            status,
            mutation,
            message: mutation.message(),
        }
    }
}
