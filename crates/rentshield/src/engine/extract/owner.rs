use std::sync::Arc;

use async_trait::async_trait;

use super::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::external::{ExternalError, IdentityDirectory};

/// Scores owner trust by account age. Scam accounts are overwhelmingly
/// days old.
pub struct OwnerVerificationExtractor {
    identity: Arc<dyn IdentityDirectory>,
    weight: u32,
    danger_below_days: u32,
    warning_below_days: u32,
}

impl OwnerVerificationExtractor {
    pub fn new(identity: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            identity,
            weight: 1,
            danger_below_days: 7,
            warning_below_days: 30,
        }
    }
}

#[async_trait]
impl RiskExtractor for OwnerVerificationExtractor {
    fn kind(&self) -> FactorKind {
        FactorKind::OwnerVerification
    }

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
        let Some(owner_id) = bundle.listing.owner_id.as_deref() else {
            return Ok(Extraction::Abstain);
        };

        let Some(age_days) = self.identity.account_age_days(owner_id).await? else {
            return Ok(Extraction::Abstain);
        };

        let (severity, description) = if age_days < self.danger_below_days {
            (
                Severity::Danger,
                "Owner account was created days ago".to_string(),
            )
        } else if age_days < self.warning_below_days {
            (
                Severity::Warning,
                "No established owner profile found".to_string(),
            )
        } else {
            (Severity::Safe, "Established owner profile".to_string())
        };

        let factor = RiskFactor::new(self.kind(), severity, self.weight, description)
            .with_details(format!("Profile created {age_days} day(s) ago"));
        Ok(Extraction::Factor(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evidence::{normalize, ListingDetails, RawSubmission};
    use crate::engine::orchestrator::AnalysisConfig;

    struct FixedIdentity(Option<u32>);

    #[async_trait]
    impl IdentityDirectory for FixedIdentity {
        async fn account_age_days(&self, _owner_id: &str) -> Result<Option<u32>, ExternalError> {
            Ok(self.0)
        }
    }

    fn bundle(owner_id: Option<&str>) -> EvidenceBundle {
        normalize(
            RawSubmission {
                text: Some("two bed flat".to_string()),
                listing: ListingDetails {
                    owner_id: owner_id.map(str::to_string),
                    ..ListingDetails::default()
                },
                ..RawSubmission::default()
            },
            &AnalysisConfig::default(),
        )
        .expect("valid bundle")
    }

    async fn severity_for(age: u32) -> Severity {
        let extractor = OwnerVerificationExtractor::new(Arc::new(FixedIdentity(Some(age))));
        match extractor
            .extract(&bundle(Some("owner-17")))
            .await
            .expect("runs")
        {
            Extraction::Factor(factor) => factor.severity,
            other => panic!("expected factor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn account_age_buckets() {
        assert_eq!(severity_for(2).await, Severity::Danger);
        assert_eq!(severity_for(14).await, Severity::Warning);
        assert_eq!(severity_for(400).await, Severity::Safe);
    }

    #[tokio::test]
    async fn abstains_without_owner_or_lookup() {
        let extractor = OwnerVerificationExtractor::new(Arc::new(FixedIdentity(Some(100))));
        assert_eq!(
            extractor.extract(&bundle(None)).await.expect("runs"),
            Extraction::Abstain
        );

        let unknown = OwnerVerificationExtractor::new(Arc::new(FixedIdentity(None)));
        assert_eq!(
            unknown
                .extract(&bundle(Some("owner-17")))
                .await
                .expect("runs"),
            Extraction::Abstain
        );
    }
}
