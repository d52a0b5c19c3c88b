//! Artifact extraction: inline verification codes and action links.
//!
//! Two families run as a strict fallback chain. The default order is
//! code first; templates whose subject marks them as button-driven run the
//! link family first. Within each family the strategies are also ordered,
//! so for a given body and order the result is deterministic.

pub mod code;
pub mod link;

use serde::Serialize;
use tracing::debug;

use crate::config::ProviderProfile;

pub use code::CodeExtractor;
pub use link::{message_guid, LinkExtractor, LinkMatch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLink {
    pub url: String,
    pub message_guid: Option<String>,
    pub remaining_validity_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    VerificationCode { code: String },
    ActionLink(ActionLink),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    NotFound,
    Found(Artifact),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyOrder {
    CodeFirst,
    LinkFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Code,
    Link,
}

impl FamilyOrder {
    fn families(self) -> [Family; 2] {
        match self {
            FamilyOrder::CodeFirst => [Family::Code, Family::Link],
            FamilyOrder::LinkFirst => [Family::Link, Family::Code],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactExtractor {
    codes: CodeExtractor,
    links: LinkExtractor,
    link_first_subjects: Vec<String>,
}

impl ArtifactExtractor {
    pub fn new(profile: &ProviderProfile) -> Self {
        Self {
            codes: CodeExtractor::new(&profile.code_container_tokens),
            links: LinkExtractor::new(profile),
            link_first_subjects: profile
                .link_first_subjects
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Family order for a message with this subject.
    pub fn order_for_subject(&self, subject: Option<&str>) -> FamilyOrder {
        let subject = subject.unwrap_or_default().to_lowercase();
        if self
            .link_first_subjects
            .iter()
            .any(|marker| subject.contains(marker.as_str()))
        {
            FamilyOrder::LinkFirst
        } else {
            FamilyOrder::CodeFirst
        }
    }

    /// Code family first, then action links. `remaining_secs` is stamped on
    /// any action link found.
    pub fn extract(
        &self,
        body: &str,
        link_domain_hint: &str,
        remaining_secs: i64,
    ) -> ExtractionResult {
        self.extract_ordered(FamilyOrder::CodeFirst, body, link_domain_hint, remaining_secs)
    }

    pub fn extract_ordered(
        &self,
        order: FamilyOrder,
        body: &str,
        link_domain_hint: &str,
        remaining_secs: i64,
    ) -> ExtractionResult {
        if body.trim().is_empty() {
            return ExtractionResult::NotFound;
        }
        for family in order.families() {
            let found = match family {
                Family::Code => self
                    .codes
                    .extract(body)
                    .map(|code| Artifact::VerificationCode { code }),
                Family::Link => self
                    .links
                    .find(body, link_domain_hint)
                    .map(|found| Artifact::ActionLink(action_link(found, remaining_secs))),
            };
            if let Some(artifact) = found {
                debug!(?family, "Artifact extracted");
                return ExtractionResult::Found(artifact);
            }
        }
        ExtractionResult::NotFound
    }

}

fn action_link(found: LinkMatch, remaining_secs: i64) -> ActionLink {
    ActionLink {
        message_guid: message_guid(&found.url),
        remaining_validity_seconds: remaining_secs,
        url: found.url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ArtifactExtractor {
        ArtifactExtractor::new(&ProviderProfile::default())
    }

    const CODE_ONLY: &str = "<p>Tu código de acceso temporal es</p><p>4821</p>";
    const LINK_ONLY: &str = r##"<table><tr><td>
<a href="https://www.netflix.com/account/travel/verify?messageGuid=g-77" style="background-color:#e50914">Obtener código</a>
</td></tr></table>"##;
    const BOTH: &str = r##"<p>Código: 613205</p>
<a href="https://www.netflix.com/account/travel/verify?messageGuid=g-88">Get code</a>"##;

    #[test]
    fn code_family_alone() {
        assert_eq!(
            extractor().extract(CODE_ONLY, "netflix.com", 840),
            ExtractionResult::Found(Artifact::VerificationCode { code: "4821".into() })
        );
    }

    #[test]
    fn link_family_alone() {
        let ExtractionResult::Found(Artifact::ActionLink(link)) =
            extractor().extract(LINK_ONLY, "netflix.com", 780)
        else {
            panic!("expected action link");
        };
        assert_eq!(link.message_guid.as_deref(), Some("g-77"));
        assert_eq!(link.remaining_validity_seconds, 780);
    }

    #[test]
    fn code_first_order_on_combined_body() {
        let result =
            extractor().extract_ordered(FamilyOrder::CodeFirst, BOTH, "netflix.com", 900);
        assert_eq!(
            result,
            ExtractionResult::Found(Artifact::VerificationCode { code: "613205".into() })
        );
    }

    #[test]
    fn link_first_order_on_combined_body() {
        let result =
            extractor().extract_ordered(FamilyOrder::LinkFirst, BOTH, "netflix.com", 900);
        let ExtractionResult::Found(Artifact::ActionLink(link)) = result else {
            panic!("expected action link");
        };
        assert_eq!(link.message_guid.as_deref(), Some("g-88"));
        assert_eq!(link.remaining_validity_seconds, 900);
    }

    #[test]
    fn link_first_falls_back_to_code() {
        let result =
            extractor().extract_ordered(FamilyOrder::LinkFirst, CODE_ONLY, "netflix.com", 900);
        assert!(matches!(result, ExtractionResult::Found(Artifact::VerificationCode { .. })));
    }

    #[test]
    fn subject_selects_order() {
        let x = extractor();
        assert_eq!(
            x.order_for_subject(Some("Tu código de ACCESO TEMPORAL de Netflix")),
            FamilyOrder::LinkFirst
        );
        assert_eq!(
            x.order_for_subject(Some("Important: how to update your Netflix Household")),
            FamilyOrder::LinkFirst
        );
        assert_eq!(x.order_for_subject(Some("Your sign-in code")), FamilyOrder::CodeFirst);
        assert_eq!(x.order_for_subject(None), FamilyOrder::CodeFirst);
    }

    #[test]
    fn empty_body_is_not_found() {
        assert_eq!(extractor().extract("   ", "netflix.com", 900), ExtractionResult::NotFound);
        assert_eq!(
            extractor().extract("Hello there", "netflix.com", 900),
            ExtractionResult::NotFound
        );
    }

    #[test]
    fn artifact_serializes_with_type_tag() {
        let json = serde_json::to_value(Artifact::VerificationCode { code: "1234".into() }).unwrap();
        assert_eq!(json["type"], "verification_code");
        assert_eq!(json["code"], "1234");

        let json = serde_json::to_value(Artifact::ActionLink(ActionLink {
            url: "https://www.netflix.com/x".into(),
            message_guid: None,
            remaining_validity_seconds: 5,
        }))
        .unwrap();
        assert_eq!(json["type"], "action_link");
        assert_eq!(json["remaining_validity_seconds"], 5);
    }
}
