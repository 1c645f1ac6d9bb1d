use async_trait::async_trait;

use super::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::external::ExternalError;

/// Urgency and pressure phrasing common in rental scams. Matched
/// case-insensitively against the listing text.
const PRESSURE_PATTERNS: &[&str] = &[
    "act now",
    "limited time",
    "today only",
    "first come first served",
    "wire transfer",
    "western union",
    "money order",
    "deposit before viewing",
    "no viewing",
    "currently overseas",
    "out of the country",
    "urgent",
];

/// Pure pattern matcher over the listing text; needs no collaborator.
#[derive(Default)]
pub struct LanguageAnalysisExtractor {
    weight_override: Option<u32>,
}

impl LanguageAnalysisExtractor {
    fn weight(&self) -> u32 {
        self.weight_override.unwrap_or(3)
    }
}

#[async_trait]
impl RiskExtractor for LanguageAnalysisExtractor {
    fn kind(&self) -> FactorKind {
        FactorKind::LanguageAnalysis
    }

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
        let Some(text) = bundle.text.as_deref() else {
            return Ok(Extraction::Abstain);
        };

        let haystack = text.to_lowercase();
        let found: Vec<&str> = PRESSURE_PATTERNS
            .iter()
            .copied()
            .filter(|pattern| haystack.contains(pattern))
            .collect();

        let (severity, description) = match found.len() {
            0 => (
                Severity::Safe,
                "No pressure language detected".to_string(),
            ),
            1 => (Severity::Warning, "Urgency language detected".to_string()),
            _ => (
                Severity::Danger,
                "Multiple high-pressure phrases detected".to_string(),
            ),
        };

        let mut factor = RiskFactor::new(self.kind(), severity, self.weight(), description);
        if !found.is_empty() {
            let quoted: Vec<String> = found.iter().map(|p| format!("\"{p}\"")).collect();
            factor = factor.with_details(format!("{} phrases found", quoted.join(", ")));
        }
        Ok(Extraction::Factor(factor))
    }
}
