//! Decides whether a message is still inside the artifact validity window.
//!
//! All comparisons happen in UTC. A `Date` header without a zone is read as
//! local time in the configured offset and converted before comparing; naive
//! and zoned instants are never compared directly.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::config::{ValidityConfig, MAX_CODE_VALIDITY_SECONDS};
use crate::error::Result;
use crate::message::CandidateMessage;

const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

#[derive(Debug, Clone)]
pub struct FreshnessValidator {
    validity: Duration,
    offset: FixedOffset,
}

impl FreshnessValidator {
    pub fn new(validity_secs: i64, offset: FixedOffset) -> Self {
        Self {
            validity: Duration::seconds(validity_secs.clamp(0, MAX_CODE_VALIDITY_SECONDS)),
            offset,
        }
    }

    pub fn from_config(config: &ValidityConfig) -> Result<Self> {
        Ok(Self::new(config.code_validity_secs, config.offset()?))
    }

    /// Valid iff `now - sent < validity`. Missing or unparsable dates are
    /// invalid and come back without a timestamp.
    pub fn is_valid(
        &self,
        message: &CandidateMessage,
        now: DateTime<Utc>,
    ) -> (bool, Option<DateTime<Utc>>) {
        self.check(message.date(), now)
    }

    pub fn check(&self, date: Option<&str>, now: DateTime<Utc>) -> (bool, Option<DateTime<Utc>>) {
        let Some(sent) = date.and_then(|raw| self.parse_date(raw)) else {
            return (false, None);
        };
        let age = now - sent;
        tracing::debug!(
            "Message date {}, now {}, age {}s",
            sent.to_rfc3339(),
            now.to_rfc3339(),
            age.num_seconds()
        );
        (age < self.validity, Some(sent))
    }

    /// Seconds of validity left, never less than one. A future-dated message
    /// counts as age zero.
    pub fn remaining_secs(&self, sent: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        let age = (now - sent).num_seconds().max(0);
        (self.validity.num_seconds() - age).max(1)
    }

    pub fn parse_date(&self, raw: &str) -> Option<DateTime<Utc>> {
        let cleaned = strip_comment(raw);
        if cleaned.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS.iter().find_map(|fmt| {
            let naive = NaiveDateTime::parse_from_str(cleaned, fmt).ok()?;
            self.offset
                .from_local_datetime(&naive)
                .single()
                .map(|local| local.with_timezone(&Utc))
        })
    }
}

/// Drops a trailing RFC 5322 comment such as "(UTC)" or "(CEST)".
fn strip_comment(raw: &str) -> &str {
    match raw.find('(') {
        Some(idx) => raw[..idx].trim(),
        None => raw.trim(),
    }
}
