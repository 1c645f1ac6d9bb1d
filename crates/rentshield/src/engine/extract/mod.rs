//! Risk factor extractors.
//!
//! Each extractor is an independent signal detector over one evidence bundle.
//! Extractors never share mutable state, tolerate being run out of order or
//! omitted, and either produce one factor of their own kind or explicitly
//! abstain. External-service failures surface as `Err` and are converted to
//! abstentions by the orchestrator after the retry budget is spent.

mod contact;
mod images;
mod language;
mod location;
mod owner;
mod price;

pub use contact::ContactVerificationExtractor;
pub use images::ImageAuthenticityExtractor;
pub use language::LanguageAnalysisExtractor;
pub use location::LocationVerificationExtractor;
pub use owner::OwnerVerificationExtractor;
pub use price::PriceDeviationExtractor;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::evidence::EvidenceBundle;
use super::external::{ExternalError, ExternalServices};

/// The signal families the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    ImageAuthenticity,
    PriceDeviation,
    LocationVerification,
    OwnerVerification,
    LanguageAnalysis,
    ContactVerification,
}

impl FactorKind {
    pub const fn label(self) -> &'static str {
        match self {
            FactorKind::ImageAuthenticity => "Image Authenticity",
            FactorKind::PriceDeviation => "Price Analysis",
            FactorKind::LocationVerification => "Location Verification",
            FactorKind::OwnerVerification => "Owner Verification",
            FactorKind::LanguageAnalysis => "Language Analysis",
            FactorKind::ContactVerification => "Contact Information",
        }
    }
}

/// Three-level severity scale shared by every factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Safe,
    Warning,
    Danger,
}

impl Severity {
    pub const fn score(self) -> u8 {
        match self {
            Severity::Safe => 0,
            Severity::Warning => 50,
            Severity::Danger => 100,
        }
    }
}

/// One scored signal contributing to a listing's risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: FactorKind,
    pub severity: Severity,
    pub weight: u32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub confidence: f32,
}

impl RiskFactor {
    pub fn new(kind: FactorKind, severity: Severity, weight: u32, description: String) -> Self {
        Self {
            kind,
            severity,
            weight,
            description,
            details: None,
            confidence: 1.0,
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Weight after confidence scaling; partially-trusted signals contribute
    /// less without being discarded.
    pub fn effective_weight(&self) -> f64 {
        f64::from(self.weight) * f64::from(self.confidence)
    }
}

/// Outcome of one extractor run.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Factor(RiskFactor),
    /// Not applicable to this bundle; excluded from aggregation.
    Abstain,
}

#[async_trait]
pub trait RiskExtractor: Send + Sync {
    fn kind(&self) -> FactorKind;

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError>;
}

/// The reference extractor set, wired to whichever collaborators are present.
/// Extractors whose collaborator is missing still run; they abstain on their
/// own when they have nothing to consult.
pub fn default_extractors(services: &ExternalServices) -> Vec<Arc<dyn RiskExtractor>> {
    let mut extractors: Vec<Arc<dyn RiskExtractor>> = Vec::new();

    if let Some(index) = services.image_index.clone() {
        extractors.push(Arc::new(ImageAuthenticityExtractor::new(
            index,
            services.permit_pool(),
        )));
    }
    if let Some(prices) = services.prices.clone() {
        extractors.push(Arc::new(PriceDeviationExtractor::new(prices)));
    }
    if let Some(geocoder) = services.geocoder.clone() {
        extractors.push(Arc::new(LocationVerificationExtractor::new(geocoder)));
    }
    if let Some(identity) = services.identity.clone() {
        extractors.push(Arc::new(OwnerVerificationExtractor::new(identity)));
    }
    extractors.push(Arc::new(LanguageAnalysisExtractor::default()));
    extractors.push(Arc::new(ContactVerificationExtractor::new(
        services.contacts.clone(),
    )));

    extractors
}
