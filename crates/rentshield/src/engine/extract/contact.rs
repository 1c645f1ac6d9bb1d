use std::sync::Arc;

use async_trait::async_trait;

use super::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::external::{ContactDirectory, ExternalError};

/// Validates the advertised contact. A malformed phone/email is a danger
/// factor on its own; a well-formed one is only scored when the carrier
/// directory can confirm or deny registration.
pub struct ContactVerificationExtractor {
    directory: Option<Arc<dyn ContactDirectory>>,
    weight: u32,
}

impl ContactVerificationExtractor {
    pub fn new(directory: Option<Arc<dyn ContactDirectory>>) -> Self {
        Self { directory, weight: 1 }
    }
}

#[async_trait]
impl RiskExtractor for ContactVerificationExtractor {
    fn kind(&self) -> FactorKind {
        FactorKind::ContactVerification
    }

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
        let Some(contact) = bundle.listing.contact.as_deref() else {
            return Ok(Extraction::Abstain);
        };

        if !looks_like_email(contact) && !looks_like_phone(contact) {
            let factor = RiskFactor::new(
                self.kind(),
                Severity::Danger,
                self.weight,
                "Contact is not a valid phone number or email".to_string(),
            );
            return Ok(Extraction::Factor(factor));
        }

        let Some(directory) = &self.directory else {
            return Ok(Extraction::Abstain);
        };

        match directory.is_registered(contact).await? {
            Some(true) => {
                let factor = RiskFactor::new(
                    self.kind(),
                    Severity::Safe,
                    self.weight,
                    "Contact appears legitimate".to_string(),
                )
                .with_details("Registered to a known carrier".to_string());
                Ok(Extraction::Factor(factor))
            }
            Some(false) => {
                let factor = RiskFactor::new(
                    self.kind(),
                    Severity::Danger,
                    self.weight,
                    "Contact is not registered with any carrier".to_string(),
                );
                Ok(Extraction::Factor(factor))
            }
            None => Ok(Extraction::Abstain),
        }
    }
}

fn looks_like_email(candidate: &str) -> bool {
    let mut parts = candidate.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        _ => false,
    }
}

fn looks_like_phone(candidate: &str) -> bool {
    let digits: String = candidate
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let allowed = candidate
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    allowed && (7..=15).contains(&digits.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evidence::{normalize, ListingDetails, RawSubmission};
    use crate::engine::orchestrator::AnalysisConfig;

    struct FixedDirectory(Option<bool>);

    #[async_trait]
    impl ContactDirectory for FixedDirectory {
        async fn is_registered(&self, _contact: &str) -> Result<Option<bool>, ExternalError> {
            Ok(self.0)
        }
    }

    fn bundle(contact: Option<&str>) -> EvidenceBundle {
        normalize(
            RawSubmission {
                text: Some("flat for rent".to_string()),
                listing: ListingDetails {
                    contact: contact.map(str::to_string),
                    ..ListingDetails::default()
                },
                ..RawSubmission::default()
            },
            &AnalysisConfig::default(),
        )
        .expect("valid bundle")
    }

    #[test]
    fn format_checks() {
        assert!(looks_like_email("owner@example.com"));
        assert!(!looks_like_email("owner@@example.com"));
        assert!(!looks_like_email("owner@nodot"));
        assert!(looks_like_phone("+1 (515) 555-0142"));
        assert!(!looks_like_phone("call me maybe"));
        assert!(!looks_like_phone("123"));
    }

    #[tokio::test]
    async fn abstains_without_contact() {
        let extractor = ContactVerificationExtractor::new(None);
        assert_eq!(
            extractor.extract(&bundle(None)).await.expect("runs"),
            Extraction::Abstain
        );
    }

    #[tokio::test]
    async fn malformed_contact_is_danger_even_without_directory() {
        let extractor = ContactVerificationExtractor::new(None);
        match extractor
            .extract(&bundle(Some("not-a-contact")))
            .await
            .expect("runs")
        {
            Extraction::Factor(factor) => assert_eq!(factor.severity, Severity::Danger),
            other => panic!("expected factor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn well_formed_contact_without_directory_abstains() {
        let extractor = ContactVerificationExtractor::new(None);
        assert_eq!(
            extractor
                .extract(&bundle(Some("owner@example.com")))
                .await
                .expect("runs"),
            Extraction::Abstain
        );
    }

    #[tokio::test]
    async fn registration_outcomes_map_to_severity() {
        let registered =
            ContactVerificationExtractor::new(Some(Arc::new(FixedDirectory(Some(true)))));
        match registered
            .extract(&bundle(Some("+15155550142")))
            .await
            .expect("runs")
        {
            Extraction::Factor(factor) => assert_eq!(factor.severity, Severity::Safe),
            other => panic!("expected factor, got {other:?}"),
        }

        let unregistered =
            ContactVerificationExtractor::new(Some(Arc::new(FixedDirectory(Some(false)))));
        match unregistered
            .extract(&bundle(Some("+15155550142")))
            .await
            .expect("runs")
        {
            Extraction::Factor(factor) => assert_eq!(factor.severity, Severity::Danger),
            other => panic!("expected factor, got {other:?}"),
        }

        let unknown = ContactVerificationExtractor::new(Some(Arc::new(FixedDirectory(None))));
        assert_eq!(
            unknown
                .extract(&bundle(Some("+15155550142")))
                .await
                .expect("runs"),
            Extraction::Abstain
        );
    }
}
