//! Listing risk assessment engine.
//!
//! The orchestrator drives normalization, the extractor fan-out, and score
//! aggregation for one submission at a time per session. The report store and
//! zone aggregator are process-wide shared state mutated only through their
//! exposed operations.

pub mod evidence;
pub mod external;
pub mod extract;
pub mod orchestrator;
pub mod reports;
pub mod score;
pub mod zones;

pub use evidence::{normalize, EvidenceBundle, EvidenceId, RawSubmission, ValidationError};
pub use extract::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
pub use orchestrator::{
    AnalysisConfig, AnalysisEngine, AnalysisId, AnalysisResult, AnalysisStatus, SessionId,
};
pub use external::{ExternalError, ExternalServices, VoterId};
pub use reports::{
    CommunityReport, CommunityReportStore, ReportDraft, ReportError, ReportId, ReportKind,
    ReportSink, ReportStoreConfig, SubmitOutcome,
};
pub use score::{aggregate, InsufficientSignalError, RiskStatus};
pub use zones::{BoundingBox, GeoPoint, Zone, ZoneConfig, ZoneId, ZoneRiskAggregator};
