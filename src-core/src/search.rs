//! Builds the IMAP SEARCH query for one retrieval.
//!
//! IMAP `SINCE` has day resolution, so the query only narrows the candidate
//! set; minute-level freshness is enforced per message afterwards.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::MAX_LOOKBACK_MINUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub since: NaiveDate,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub combinator: Combinator,
}

impl SearchQuery {
    /// Renders the query in IMAP SEARCH syntax, e.g.
    /// `SINCE 16-Oct-2026 FROM "info@account.netflix.com"`.
    ///
    /// Quoted strings are 7-bit only; `EngineConfig::validate` rejects
    /// non-ASCII filter terms.
    pub fn to_imap(&self) -> String {
        let mut terms = Vec::new();
        if let Some(from) = &self.from {
            terms.push(format!("FROM {}", quote(from)));
        }
        if let Some(subject) = &self.subject {
            terms.push(format!("SUBJECT {}", quote(subject)));
        }

        let since = format!("SINCE {}", self.since.format("%d-%b-%Y"));
        match (self.combinator, terms.len()) {
            (Combinator::Or, 2) => format!("{} OR {} {}", since, terms[0], terms[1]),
            _ if terms.is_empty() => since,
            _ => format!("{} {}", since, terms.join(" ")),
        }
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Clone)]
pub struct CriteriaBuilder {
    provider_sender: String,
    forward_marker: String,
}

impl CriteriaBuilder {
    pub fn new(provider_sender: impl Into<String>, forward_marker: impl Into<String>) -> Self {
        Self {
            provider_sender: provider_sender.into(),
            forward_marker: forward_marker.into(),
        }
    }

    /// Lower bound is the calendar date of `now - lookback`, one day earlier
    /// to absorb the server evaluating `SINCE` in its own zone.
    ///
    /// Without a sender filter the scope widens to provider mail OR
    /// forwarded mail (subject filter, else the forward marker).
    pub fn build(
        &self,
        now: DateTime<Utc>,
        lookback_minutes: i64,
        from_filter: Option<&str>,
        subject_filter: Option<&str>,
    ) -> SearchQuery {
        let lower = now - Duration::minutes(lookback_minutes.clamp(0, MAX_LOOKBACK_MINUTES));
        let since = lower.date_naive() - Duration::days(1);
        let subject_filter = subject_filter.filter(|s| !s.trim().is_empty());

        match from_filter.filter(|s| !s.trim().is_empty()) {
            Some(from) => SearchQuery {
                since,
                from: Some(from.to_string()),
                subject: subject_filter.map(str::to_string),
                combinator: Combinator::And,
            },
            None => SearchQuery {
                since,
                from: Some(self.provider_sender.clone()),
                subject: Some(subject_filter.unwrap_or(&self.forward_marker).to_string()),
                combinator: Combinator::Or,
            },
        }
    }
}
