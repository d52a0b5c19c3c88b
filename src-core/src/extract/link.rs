//! Action-link extraction for button-driven templates ("Get code",
//! "Yes, it was me").

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::config::ProviderProfile;

static ANCHORS: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("a[href]").ok());

/// The attributes of one `<a href>` the strategies look at.
struct Anchor {
    href: String,
    text: String,
    class: String,
    style: String,
}

impl Anchor {
    fn from_element(el: ElementRef<'_>) -> Option<Self> {
        let href = el.value().attr("href")?.trim().to_string();
        if href.is_empty() {
            return None;
        }
        Some(Self {
            text: normalize_text(&el.text().collect::<String>()),
            class: el.value().attr("class").unwrap_or_default().to_lowercase(),
            style: el.value().attr("style").unwrap_or_default().to_lowercase(),
            href,
        })
    }
}

type Strategy = fn(&LinkExtractor, &Anchor) -> bool;

/// Evaluated strictly in this order; the first accepted anchor wins.
const STRATEGIES: [(&str, Strategy); 4] = [
    ("visible_text", LinkExtractor::matches_phrase),
    ("button_class", LinkExtractor::matches_class),
    ("accent_style", LinkExtractor::matches_accent),
    ("href_keywords", LinkExtractor::matches_href),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch {
    pub url: String,
    pub strategy: &'static str,
}

#[derive(Debug, Clone)]
pub struct LinkExtractor {
    phrases: Vec<String>,
    classes: Vec<String>,
    accent_color: String,
    provider_domain: String,
    keywords: Vec<String>,
}

impl LinkExtractor {
    pub fn new(profile: &ProviderProfile) -> Self {
        let lower = |items: &[String]| items.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        Self {
            phrases: profile.link_phrases.iter().map(|p| normalize_text(p)).collect(),
            classes: lower(&profile.link_classes),
            accent_color: profile.accent_color.to_lowercase(),
            provider_domain: profile.link_domain.to_lowercase(),
            keywords: lower(&profile.link_keywords),
        }
    }

    /// Runs the strategies in order over every anchor in `body`. A candidate
    /// whose href lacks `domain_hint` is rejected and the scan continues.
    pub fn find(&self, body: &str, domain_hint: &str) -> Option<LinkMatch> {
        let selector = ANCHORS.as_ref()?;
        let doc = Html::parse_document(body);
        let anchors: Vec<Anchor> = doc.select(selector).filter_map(Anchor::from_element).collect();
        if anchors.is_empty() {
            return None;
        }
        let hint = domain_hint.to_lowercase();

        for (name, strategy) in STRATEGIES {
            for anchor in anchors.iter().filter(|a| strategy(self, a)) {
                if anchor.href.to_lowercase().contains(&hint) {
                    debug!(strategy = name, "Action link found");
                    return Some(LinkMatch {
                        url: anchor.href.clone(),
                        strategy: name,
                    });
                }
                warn!(
                    strategy = name,
                    "Rejected link outside {}: {}", domain_hint, anchor.href
                );
            }
        }
        None
    }

    fn matches_phrase(&self, anchor: &Anchor) -> bool {
        self.phrases.iter().any(|p| *p == anchor.text)
    }

    fn matches_class(&self, anchor: &Anchor) -> bool {
        !anchor.class.is_empty() && self.classes.iter().any(|c| anchor.class.contains(c.as_str()))
    }

    fn matches_accent(&self, anchor: &Anchor) -> bool {
        !self.accent_color.is_empty() && anchor.style.contains(&self.accent_color)
    }

    fn matches_href(&self, anchor: &Anchor) -> bool {
        let href = anchor.href.to_lowercase();
        href.contains(&self.provider_domain)
            && self.keywords.iter().any(|k| href.contains(k.as_str()))
    }
}

/// Opaque `messageGuid` query parameter of an action link, if any.
pub fn message_guid(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "messageGuid")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LinkExtractor {
        LinkExtractor::new(&ProviderProfile::default())
    }

    #[test]
    fn visible_text_wins_over_later_strategies() {
        let body = r##"<a href="https://www.netflix.com/account/travel/verify?messageGuid=styled" style="background-color:#E50914">Ver detalles</a>
<a href="https://www.netflix.com/account/travel/verify?messageGuid=text">
    Obtener   código
</a>"##;
        let found = extractor().find(body, "netflix.com").unwrap();
        assert_eq!(found.strategy, "visible_text");
        assert_eq!(message_guid(&found.url).as_deref(), Some("text"));
    }

    #[test]
    fn english_confirmation_phrase() {
        let body = r#"<a href="https://www.netflix.com/account/update-primary-location?nftoken=x">Yes, It Was Me</a>"#;
        let found = extractor().find(body, "netflix.com").unwrap();
        assert_eq!(found.strategy, "visible_text");
    }

    #[test]
    fn button_class() {
        let body = r#"<a class="btn get-code-button" href="https://www.netflix.com/ilum?code=1">Continuar</a>"#;
        assert_eq!(extractor().find(body, "netflix.com").unwrap().strategy, "button_class");
    }

    #[test]
    fn accent_style() {
        let body = r##"<a href="https://help.netflix.com/x">Ayuda</a>
<a style="color:#fff;background:#e50914;padding:12px" href="https://www.netflix.com/account/travel/verify?messageGuid=abc123&amp;lang=es">Continuar</a>"##;
        let found = extractor().find(body, "netflix.com").unwrap();
        assert_eq!(found.strategy, "accent_style");
        assert_eq!(message_guid(&found.url).as_deref(), Some("abc123"));
    }

    #[test]
    fn href_keywords_need_provider_domain() {
        let body = r#"<a href="https://tracker.example.org/codigo">x</a>
<a href="https://www.netflix.com/codigo?g=1">y</a>"#;
        let found = extractor().find(body, "netflix.com").unwrap();
        assert_eq!(found.strategy, "href_keywords");
        assert_eq!(found.url, "https://www.netflix.com/codigo?g=1");
    }

    #[test]
    fn spoofed_link_is_rejected() {
        let body = r#"<a href="https://phish.example/steal">Get code</a>"#;
        assert!(extractor().find(body, "netflix.com").is_none());
    }

    #[test]
    fn spoofed_link_does_not_hide_genuine_one() {
        let body = r##"<a href="https://phish.example/steal">Get code</a>
<a style="background:#e50914" href="https://www.netflix.com/verify">Go</a>"##;
        let found = extractor().find(body, "netflix.com").unwrap();
        assert_eq!(found.strategy, "accent_style");
    }

    #[test]
    fn no_anchors() {
        assert!(extractor().find("<p>Tu código es 1234</p>", "netflix.com").is_none());
        assert!(extractor().find("plain text with no markup", "netflix.com").is_none());
    }

    #[test]
    fn guid_is_optional() {
        assert_eq!(message_guid("https://www.netflix.com/verify"), None);
        assert_eq!(message_guid("https://www.netflix.com/verify?messageGuid="), None);
        assert_eq!(message_guid("not a url"), None);
        assert_eq!(
            message_guid("https://provider.com/verify?a=1&messageGuid=abc%2D123"),
            Some("abc-123".to_string())
        );
    }
}
