use std::sync::Arc;

use async_trait::async_trait;

use super::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::external::{ExternalError, Geocoder};

/// Checks that the stated address actually resolves and is consistent with
/// the listing text. An address the geocoder cannot place is a strong fraud
/// signal; an unreachable geocoder is not.
pub struct LocationVerificationExtractor {
    geocoder: Arc<dyn Geocoder>,
    weight: u32,
}

impl LocationVerificationExtractor {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self { geocoder, weight: 1 }
    }
}

#[async_trait]
impl RiskExtractor for LocationVerificationExtractor {
    fn kind(&self) -> FactorKind {
        FactorKind::LocationVerification
    }

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
        let Some(address) = bundle.listing.address.as_deref() else {
            return Ok(Extraction::Abstain);
        };

        let Some(resolved) = self.geocoder.resolve(address).await? else {
            let factor = RiskFactor::new(
                self.kind(),
                Severity::Danger,
                self.weight,
                "Address could not be resolved".to_string(),
            )
            .with_details(format!("No geocoding result for '{address}'"));
            return Ok(Extraction::Factor(factor));
        };

        if city_contradicted(bundle) {
            let factor = RiskFactor::new(
                self.kind(),
                Severity::Danger,
                self.weight,
                "Stated city does not appear in the listing".to_string(),
            );
            return Ok(Extraction::Factor(factor));
        }

        let factor = if resolved.verified {
            RiskFactor::new(
                self.kind(),
                Severity::Safe,
                self.weight,
                "Address matches listing description".to_string(),
            )
            .with_details(format!("Resolved to ({:.4}, {:.4})", resolved.lat, resolved.lng))
        } else {
            RiskFactor::new(
                self.kind(),
                Severity::Warning,
                self.weight,
                "Address resolves but could not be verified".to_string(),
            )
        };
        Ok(Extraction::Factor(factor))
    }
}

/// True when the submission names a city that the listing text never
/// mentions. Only meaningful when both are present.
fn city_contradicted(bundle: &EvidenceBundle) -> bool {
    let (Some(city), Some(text)) = (bundle.listing.city.as_deref(), bundle.text.as_deref()) else {
        return false;
    };
    let haystack = text.to_lowercase();
    !city
        .split_whitespace()
        .any(|token| haystack.contains(&token.to_lowercase()))
}
