use once_cell::unsync::OnceCell;

use crate::body::{self, DecodedBody};
use crate::error::{Error, Result};

/// One fetched mailbox entry under inspection.
///
/// Headers are parsed up front; the body is decoded on first access since
/// most candidates are rejected on recipient or date alone.
pub struct CandidateMessage {
    uid: u32,
    raw: Vec<u8>,
    headers: Vec<(String, String)>,
    body: OnceCell<DecodedBody>,
}

impl CandidateMessage {
    pub fn parse(uid: u32, raw: Vec<u8>) -> Result<Self> {
        let (parsed, _) = mailparse::parse_headers(&raw).map_err(|e| Error::MalformedMessage {
            uid,
            reason: e.to_string(),
        })?;
        let headers = parsed
            .iter()
            .map(|h| (h.get_key(), h.get_value()))
            .collect::<Vec<_>>();
        if headers.is_empty() {
            return Err(Error::MalformedMessage {
                uid,
                reason: "no headers".to_string(),
            });
        }
        Ok(Self {
            uid,
            raw,
            headers,
            body: OnceCell::new(),
        })
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// First header with this name (case-insensitive), RFC 2047 decoded.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn to(&self) -> Option<&str> {
        self.header("To")
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn date(&self) -> Option<&str> {
        self.header("Date")
    }

    pub fn body(&self) -> &DecodedBody {
        self.body.get_or_init(|| match mailparse::parse_mail(&self.raw) {
            Ok(parsed) => body::decode(&parsed),
            Err(e) => {
                tracing::warn!(uid = self.uid, "Failed to parse message body: {}", e);
                DecodedBody::empty()
            }
        })
    }
}
