use std::sync::Arc;

use async_trait::async_trait;

use super::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::external::{AreaPriceIndex, ExternalError};

/// Compares the listed rent against the area average. Too-good-to-be-true
/// pricing is the classic advance-payment lure.
pub struct PriceDeviationExtractor {
    prices: Arc<dyn AreaPriceIndex>,
    weight: u32,
    warning_below: f64,
    danger_below: f64,
}

impl PriceDeviationExtractor {
    pub fn new(prices: Arc<dyn AreaPriceIndex>) -> Self {
        Self {
            prices,
            weight: 1,
            warning_below: 0.15,
            danger_below: 0.30,
        }
    }
}

#[async_trait]
impl RiskExtractor for PriceDeviationExtractor {
    fn kind(&self) -> FactorKind {
        FactorKind::PriceDeviation
    }

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
        let Some(listed) = bundle.listing.listed_rent else {
            return Ok(Extraction::Abstain);
        };
        let Some(area) = bundle
            .listing
            .city
            .as_deref()
            .or(bundle.listing.address.as_deref())
        else {
            return Ok(Extraction::Abstain);
        };

        let Some(average) = self
            .prices
            .average_rent(area, bundle.listing.bedrooms)
            .await?
        else {
            return Ok(Extraction::Abstain);
        };
        if average == 0 {
            return Ok(Extraction::Abstain);
        }

        let below = (f64::from(average) - f64::from(listed)) / f64::from(average);
        let (severity, description) = if below >= self.danger_below {
            (
                Severity::Danger,
                format!("Listed {:.0}% below area average", below * 100.0),
            )
        } else if below >= self.warning_below {
            (
                Severity::Warning,
                format!("Listed {:.0}% below area average", below * 100.0),
            )
        } else {
            (
                Severity::Safe,
                "Price is in line with the area average".to_string(),
            )
        };

        let factor = RiskFactor::new(self.kind(), severity, self.weight, description)
            .with_details(format!("Avg. rent in area: ${average}/mo"));
        Ok(Extraction::Factor(factor))
    }
}
