//! Inline verification code extraction.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

struct CodePattern {
    name: &'static str,
    regex: Regex,
}

/// Ordered from most to least specific. The first pattern that matches wins.
static CODE_PATTERNS: Lazy<Vec<CodePattern>> = Lazy::new(|| {
    [
        ("temporary_access_es", r"(?i)c[óo]digo de acceso temporal.*?\b(\d{4,8})\b"),
        ("temporary_access_en", r"(?i)temporary access code.*?\b(\d{4,8})\b"),
        ("verification_code", r"(?i)verification code:?\s*(\d{4,8})\b"),
        ("confirmation_code", r"(?i)confirm.*?code:?\s*(\d{4,8})\b"),
        ("codigo", r"(?i)c[óo]digo.*?\b(\d{4,8})\b"),
        ("code", r"(?i)code.*?\b(\d{4,8})\b"),
        ("bare_digits", r"\b(\d{4,8})\b"),
        ("six_digits", r"\b(\d{6})\b"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| {
        Regex::new(pattern)
            .map(|regex| CodePattern { name, regex })
            .map_err(|e| tracing::error!("Invalid code pattern {}: {}", name, e))
            .ok()
    })
    .collect()
});

static TAGGED_ELEMENTS: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("[class], [id]").ok());

/// Finds an inline code, first in the raw text and then inside elements
/// whose class or id looks like a code container.
#[derive(Debug, Clone)]
pub struct CodeExtractor {
    container_tokens: Vec<String>,
}

impl CodeExtractor {
    pub fn new(container_tokens: &[String]) -> Self {
        Self {
            container_tokens: container_tokens.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn extract(&self, body: &str) -> Option<String> {
        if let Some(code) = match_patterns(body) {
            return Some(code);
        }
        self.scan_containers(body)
    }

    fn scan_containers(&self, body: &str) -> Option<String> {
        let selector = TAGGED_ELEMENTS.as_ref()?;
        let doc = Html::parse_document(body);
        doc.select(selector)
            .filter(|el| {
                let attrs = format!(
                    "{} {}",
                    el.value().attr("class").unwrap_or_default(),
                    el.value().id().unwrap_or_default()
                )
                .to_lowercase();
                self.container_tokens.iter().any(|token| attrs.contains(token.as_str()))
            })
            .find_map(|el| {
                let text = el.text().collect::<Vec<_>>().join(" ");
                match_patterns(&text)
            })
    }
}

/// Applies the pattern list in order and returns the first capture.
fn match_patterns(text: &str) -> Option<String> {
    CODE_PATTERNS.iter().find_map(|pattern| {
        let code = pattern.regex.captures(text)?.get(1)?.as_str().to_string();
        debug!(pattern = pattern.name, "Code pattern matched");
        Some(code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CodeExtractor {
        CodeExtractor::new(&["code".into(), "codigo".into(), "verification".into(), "pin".into()])
    }

    #[test]
    fn temporary_access_phrase_beats_earlier_digits() {
        let body = "Ref 9999 - Tu código de acceso temporal es 4821";
        assert_eq!(match_patterns(body).as_deref(), Some("4821"));
    }

    #[test]
    fn english_verification_code() {
        let body = "Hello,\nYour verification code: 730214\nThanks";
        assert_eq!(extractor().extract(body).as_deref(), Some("730214"));
    }

    #[test]
    fn generic_codigo_phrase() {
        let body = "Ingresa este código 55120 para continuar";
        assert_eq!(extractor().extract(body).as_deref(), Some("55120"));
    }

    #[test]
    fn overlong_digit_runs_are_not_truncated() {
        let body = "code: order 1234567890123 then 8841";
        assert_eq!(match_patterns(body).as_deref(), Some("8841"));
    }

    #[test]
    fn standalone_line_of_digits() {
        let body = "Enter this to sign in:\n\n   90210   \n\nIt expires soon.";
        assert_eq!(extractor().extract(body).as_deref(), Some("90210"));
    }

    #[test]
    fn bare_inline_digits() {
        assert_eq!(extractor().extract("Use 4821 to continue.").as_deref(), Some("4821"));
        assert_eq!(extractor().extract("Use 314159 to continue.").as_deref(), Some("314159"));
    }

    #[test]
    fn bare_digits_respect_length_bounds() {
        assert!(extractor().extract("Call 555 or visit room 12.").is_none());
        assert!(extractor().extract("Order 123456789 shipped.").is_none());
    }

    #[test]
    fn no_code_in_body() {
        assert!(extractor().extract("Welcome back! Nothing to see here.").is_none());
        assert!(extractor().extract("").is_none());
    }

    #[test]
    fn container_scan_reads_entity_encoded_digits() {
        let body = "<html><body>\n<p>Hola</p>\n<div class=\"lrg-number\">\n<span id=\"pin-value\">\n8 1 3 2\n</span>\n</div>\n\
<div class=\"verification-box\">\n<b>&#55;&#55;&#49;&#48;</b>\n</div></body></html>";
        assert!(match_patterns(body).is_none());
        assert_eq!(extractor().extract(body).as_deref(), Some("7710"));
    }

    #[test]
    fn container_scan_ignores_unrelated_elements() {
        let body = "<div class=\"footer\">\nPO Box\n</div>\n<div class=\"banner\">\nnothing\n</div>";
        assert!(extractor().scan_containers(body).is_none());
    }
}
