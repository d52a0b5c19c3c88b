//! Recipient attribution: direct `To` matches and forwarded-mail matches.

use mailparse::MailAddr;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::debug;

use crate::message::CandidateMessage;

/// Checked in order before falling back to the body.
const ORIGINAL_SENDER_HEADERS: &[&str] = &[
    "X-Original-From",
    "X-Original-Sender",
    "X-Forwarded-For",
    "X-Forwarded-From",
    "Resent-From",
];

static SENDER_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:from|de|sender)\s*:\s*([^\r\n]+)").ok());

static ADDRESS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").ok());

/// True when `target` is one of the `To` recipients (case-insensitive).
pub fn matches_direct(message: &CandidateMessage, target: &str) -> bool {
    let Some(to) = message.to() else {
        return false;
    };
    let target = target.trim().to_lowercase();
    match mailparse::addrparse(to) {
        Ok(list) => list.iter().any(|addr| match addr {
            MailAddr::Single(info) => info.addr.trim().eq_ignore_ascii_case(&target),
            MailAddr::Group(group) => group
                .addrs
                .iter()
                .any(|info| info.addr.trim().eq_ignore_ascii_case(&target)),
        }),
        Err(e) => {
            debug!(uid = message.uid(), "Unparsable To header ({}), using substring match", e);
            to.to_lowercase().contains(&target)
        }
    }
}

/// True when the original sender of a forwarded message belongs to
/// `domain` or one of its subdomains. No extractable sender means no match.
pub fn matches_forwarded(message: &CandidateMessage, domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    let Some(sender) = original_sender(message) else {
        debug!(uid = message.uid(), "No original sender found, excluding");
        return false;
    };
    let Some((_, host)) = sender.rsplit_once('@') else {
        return false;
    };
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Best-effort original sender address, lower-cased. Override headers win;
/// otherwise the first `From:`/`De:`/`Sender:` line in the body that carries
/// an address.
pub fn original_sender(message: &CandidateMessage) -> Option<String> {
    for name in ORIGINAL_SENDER_HEADERS {
        if let Some(addr) = message.header(name).and_then(first_address) {
            return Some(addr);
        }
    }

    let body = message.body();
    if body.is_empty() {
        return None;
    }
    let text = if body.is_html() {
        Html::parse_document(body.as_str())
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        body.as_str().to_string()
    };

    let lines = SENDER_LINE.as_ref()?;
    lines
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| first_address(m.as_str()))
}

fn first_address(value: &str) -> Option<String> {
    ADDRESS
        .as_ref()?
        .find(value)
        .map(|m| m.as_str().to_lowercase())
}
