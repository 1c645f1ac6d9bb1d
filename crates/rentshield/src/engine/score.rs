use serde::{Deserialize, Serialize};

use super::extract::RiskFactor;

/// Status bucket derived from a score. The mapping is a pure function so a
/// stored score can always be re-bucketed identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Safe,
    Caution,
    Danger,
}

impl RiskStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=30 => RiskStatus::Safe,
            31..=60 => RiskStatus::Caution,
            _ => RiskStatus::Danger,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RiskStatus::Safe => "safe",
            RiskStatus::Caution => "caution",
            RiskStatus::Danger => "danger",
        }
    }
}

/// No extractor produced a usable factor. Surfaced as a failed analysis
/// rather than a misleading default score.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not enough verifiable signal to score this listing")]
pub struct InsufficientSignalError;

/// Confidence-weighted mean of factor severities, rounded and clamped to
/// [0, 100]. Deterministic: equal inputs always produce equal scores.
pub fn aggregate(factors: &[RiskFactor]) -> Result<(u8, RiskStatus), InsufficientSignalError> {
    let total_weight: f64 = factors.iter().map(RiskFactor::effective_weight).sum();
    if total_weight <= 0.0 {
        return Err(InsufficientSignalError);
    }

    let weighted_sum: f64 = factors
        .iter()
        .map(|f| f.effective_weight() * f64::from(f.severity.score()))
        .sum();

    let score = (weighted_sum / total_weight).round().clamp(0.0, 100.0) as u8;
    Ok((score, RiskStatus::from_score(score)))
}
