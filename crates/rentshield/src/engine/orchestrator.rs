use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::evidence::{normalize, EvidenceBundle, EvidenceId, RawSubmission, ValidationError};
use super::extract::{default_extractors, Extraction, RiskExtractor, RiskFactor};
use super::external::{with_retry, ExternalServices};
use super::score::{aggregate, RiskStatus};

/// Knobs for one analysis run. Reference defaults; every value is expected to
/// be tuned per deployment.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Ceiling per extractor; a slower external call becomes an abstention.
    pub extractor_timeout: Duration,
    /// Per-file upload limit enforced by the normalizer.
    pub max_image_bytes: usize,
    /// Cap on concurrent outbound lookups across one engine instance.
    pub max_concurrent_lookups: usize,
    /// Retries for unavailable collaborators before degrading to abstention.
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            extractor_timeout: Duration::from_secs(5),
            max_image_bytes: 10 * 1024 * 1024,
            max_concurrent_lookups: 4,
            retry_attempts: 2,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Identifier for the session owning a submission. Sessions come from the
/// front end; the engine only uses them for replace-on-arrival and teardown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Identifier for one accepted analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisId(pub String);

static ANALYSIS_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_analysis_id() -> AnalysisId {
    let id = ANALYSIS_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AnalysisId(format!("an-{id:06}"))
}

/// Non-terminal phases of an in-flight analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Validating,
    Extracting,
    Aggregating,
}

/// Final scored outcome of one analysis. Reproducible: identical evidence and
/// collaborator responses yield an identical score and factor list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: AnalysisId,
    pub evidence_id: EvidenceId,
    pub score: u8,
    pub status: RiskStatus,
    pub factors: Vec<RiskFactor>,
    pub computed_at: DateTime<Utc>,
}

/// Snapshot of an analysis as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending { phase: AnalysisPhase },
    Complete { result: AnalysisResult },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone)]
enum AnalysisState {
    Pending(AnalysisPhase),
    Complete(AnalysisResult),
    Failed(String),
    Cancelled,
}

impl AnalysisState {
    fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisState::Pending(_))
    }

    fn snapshot(&self) -> AnalysisStatus {
        match self {
            AnalysisState::Pending(phase) => AnalysisStatus::Pending { phase: *phase },
            AnalysisState::Complete(result) => AnalysisStatus::Complete {
                result: result.clone(),
            },
            AnalysisState::Failed(reason) => AnalysisStatus::Failed {
                reason: reason.clone(),
            },
            AnalysisState::Cancelled => AnalysisStatus::Cancelled,
        }
    }
}

struct AnalysisEntry {
    session: SessionId,
    state: AnalysisState,
}

struct ActiveAnalysis {
    id: AnalysisId,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct EngineState {
    analyses: HashMap<AnalysisId, AnalysisEntry>,
    sessions: HashMap<SessionId, ActiveAnalysis>,
}

/// Drives one submission through validation, the concurrent extractor
/// fan-out, and aggregation. At most one active analysis per session: a new
/// submission replaces and cancels the previous one. Terminal results stay
/// retrievable until the owning session is evicted.
pub struct AnalysisEngine {
    extractors: Vec<Arc<dyn RiskExtractor>>,
    config: AnalysisConfig,
    inner: Arc<Mutex<EngineState>>,
}

impl AnalysisEngine {
    pub fn new(services: &ExternalServices, config: AnalysisConfig) -> Self {
        Self::with_extractors(default_extractors(services), config)
    }

    pub fn with_extractors(
        extractors: Vec<Arc<dyn RiskExtractor>>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            extractors,
            config,
            inner: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Accept a submission for asynchronous analysis. Validation failures are
    /// returned immediately; everything else is reported through `get`.
    pub fn submit(
        &self,
        session: &SessionId,
        raw: RawSubmission,
    ) -> Result<AnalysisId, ValidationError> {
        let id = next_analysis_id();

        {
            let mut state = self.inner.lock().expect("engine mutex poisoned");
            cancel_active_locked(&mut state, session);
            state.analyses.insert(
                id.clone(),
                AnalysisEntry {
                    session: session.clone(),
                    state: AnalysisState::Pending(AnalysisPhase::Validating),
                },
            );
            state.sessions.insert(
                session.clone(),
                ActiveAnalysis {
                    id: id.clone(),
                    handle: None,
                },
            );
        }

        let bundle = match normalize(raw, &self.config) {
            Ok(bundle) => bundle,
            Err(err) => {
                let mut state = self.inner.lock().expect("engine mutex poisoned");
                state.analyses.remove(&id);
                if state
                    .sessions
                    .get(session)
                    .map(|active| active.id == id)
                    .unwrap_or(false)
                {
                    state.sessions.remove(session);
                }
                return Err(err);
            }
        };

        let handle = tokio::spawn(run_analysis(
            self.inner.clone(),
            self.extractors.clone(),
            self.config.clone(),
            id.clone(),
            bundle,
        ));

        let mut state = self.inner.lock().expect("engine mutex poisoned");
        if let Some(active) = state.sessions.get_mut(session) {
            if active.id == id {
                active.handle = Some(handle);
            } else {
                // Already replaced by an even newer submission.
                handle.abort();
            }
        }
        info!(analysis = %id.0, session = %session.0, "analysis accepted");
        Ok(id)
    }

    /// Snapshot of an analysis by id, any state.
    pub fn get(&self, id: &AnalysisId) -> Option<AnalysisStatus> {
        let state = self.inner.lock().expect("engine mutex poisoned");
        state.analyses.get(id).map(|entry| entry.state.snapshot())
    }

    /// The session's most recent analysis id, if any. A replaced analysis is
    /// never current again.
    pub fn current_analysis(&self, session: &SessionId) -> Option<AnalysisId> {
        let state = self.inner.lock().expect("engine mutex poisoned");
        state.sessions.get(session).map(|active| active.id.clone())
    }

    /// Session teardown: cancels any in-flight analysis and evicts the
    /// session's results.
    pub fn evict_session(&self, session: &SessionId) {
        let mut state = self.inner.lock().expect("engine mutex poisoned");
        cancel_active_locked(&mut state, session);
        state.sessions.remove(session);
        state.analyses.retain(|_, entry| &entry.session != session);
        debug!(session = %session.0, "session evicted");
    }
}

fn cancel_active_locked(state: &mut EngineState, session: &SessionId) {
    if let Some(active) = state.sessions.remove(session) {
        if let Some(entry) = state.analyses.get_mut(&active.id) {
            if !entry.state.is_terminal() {
                entry.state = AnalysisState::Cancelled;
                info!(analysis = %active.id.0, "analysis cancelled by newer submission");
            }
        }
        if let Some(handle) = active.handle {
            // Cooperative: the task stops at its next await point and its
            // partial results are discarded with it.
            handle.abort();
        }
    }
}

fn set_state(inner: &Mutex<EngineState>, id: &AnalysisId, next: AnalysisState) -> bool {
    let mut state = inner.lock().expect("engine mutex poisoned");
    match state.analyses.get_mut(id) {
        Some(entry) if !entry.state.is_terminal() => {
            entry.state = next;
            true
        }
        _ => false,
    }
}

async fn run_analysis(
    inner: Arc<Mutex<EngineState>>,
    extractors: Vec<Arc<dyn RiskExtractor>>,
    config: AnalysisConfig,
    id: AnalysisId,
    bundle: EvidenceBundle,
) {
    if !set_state(&inner, &id, AnalysisState::Pending(AnalysisPhase::Extracting)) {
        return;
    }

    let bundle = Arc::new(bundle);
    let mut fan_out = JoinSet::new();
    for extractor in extractors {
        let bundle = bundle.clone();
        let timeout = config.extractor_timeout;
        let attempts = config.retry_attempts;
        let base_delay = config.retry_base_delay;
        fan_out.spawn(async move {
            let kind = extractor.kind();
            let run = with_retry(attempts, base_delay, || extractor.extract(&bundle));
            let outcome = tokio::time::timeout(timeout, run).await;
            (kind, outcome)
        });
    }

    // Join barrier: every extractor outcome (factor, abstention, timeout) is
    // observed before aggregation starts.
    let mut factors: Vec<RiskFactor> = Vec::new();
    while let Some(joined) = fan_out.join_next().await {
        match joined {
            Ok((_, Ok(Ok(Extraction::Factor(factor))))) => factors.push(factor),
            Ok((kind, Ok(Ok(Extraction::Abstain)))) => {
                debug!(?kind, "extractor abstained");
            }
            Ok((kind, Ok(Err(err)))) => {
                warn!(?kind, %err, "extractor degraded to abstention");
            }
            Ok((kind, Err(_elapsed))) => {
                warn!(?kind, "extractor timed out, treated as abstention");
            }
            Err(err) => warn!(%err, "extractor task failed"),
        }
    }

    if !set_state(&inner, &id, AnalysisState::Pending(AnalysisPhase::Aggregating)) {
        return;
    }

    factors.sort_by_key(|factor| factor.kind);
    let next = match aggregate(&factors) {
        Ok((score, status)) => AnalysisState::Complete(AnalysisResult {
            id: id.clone(),
            evidence_id: bundle.id.clone(),
            score,
            status,
            factors,
            computed_at: Utc::now(),
        }),
        Err(err) => AnalysisState::Failed(err.to_string()),
    };
    set_state(&inner, &id, next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::extract::{Extraction, FactorKind, RiskFactor, Severity};
    use crate::engine::external::ExternalError;
    use async_trait::async_trait;

    struct FixedExtractor {
        kind: FactorKind,
        severity: Severity,
        weight: u32,
        delay: Duration,
    }

    #[async_trait]
    impl RiskExtractor for FixedExtractor {
        fn kind(&self) -> FactorKind {
            self.kind
        }

        async fn extract(&self, _bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
            tokio::time::sleep(self.delay).await;
            Ok(Extraction::Factor(RiskFactor::new(
                self.kind,
                self.severity,
                self.weight,
                self.kind.label().to_string(),
            )))
        }
    }

    struct AbstainingExtractor;

    #[async_trait]
    impl RiskExtractor for AbstainingExtractor {
        fn kind(&self) -> FactorKind {
            FactorKind::OwnerVerification
        }

        async fn extract(&self, _bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
            Ok(Extraction::Abstain)
        }
    }

    fn text_submission(text: &str) -> RawSubmission {
        RawSubmission {
            text: Some(text.to_string()),
            ..RawSubmission::default()
        }
    }

    fn quick_config() -> AnalysisConfig {
        AnalysisConfig {
            extractor_timeout: Duration::from_millis(100),
            retry_attempts: 0,
            retry_base_delay: Duration::from_millis(1),
            ..AnalysisConfig::default()
        }
    }

    async fn wait_terminal(engine: &AnalysisEngine, id: &AnalysisId) -> AnalysisStatus {
        for _ in 0..200 {
            match engine.get(id) {
                Some(AnalysisStatus::Pending { .. }) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Some(status) => return status,
                None => panic!("analysis {id:?} disappeared"),
            }
        }
        panic!("analysis {id:?} never reached a terminal state");
    }

    #[tokio::test]
    async fn completes_with_factors_from_all_extractors() {
        let engine = AnalysisEngine::with_extractors(
            vec![
                Arc::new(FixedExtractor {
                    kind: FactorKind::LanguageAnalysis,
                    severity: Severity::Danger,
                    weight: 3,
                    delay: Duration::from_millis(1),
                }),
                Arc::new(FixedExtractor {
                    kind: FactorKind::ContactVerification,
                    severity: Severity::Safe,
                    weight: 1,
                    delay: Duration::from_millis(5),
                }),
                Arc::new(AbstainingExtractor),
            ],
            quick_config(),
        );
        let session = SessionId("s-1".to_string());
        let id = engine
            .submit(&session, text_submission("wire transfer only"))
            .expect("accepted");

        match wait_terminal(&engine, &id).await {
            AnalysisStatus::Complete { result } => {
                // 100*3 + 0*1 over 4 -> 75
                assert_eq!(result.score, 75);
                assert_eq!(result.status, RiskStatus::Danger);
                assert_eq!(result.factors.len(), 2);
                // factors are ordered by kind, not completion order
                assert_eq!(result.factors[0].kind, FactorKind::LanguageAnalysis);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_errors_return_immediately() {
        let engine = AnalysisEngine::with_extractors(vec![], quick_config());
        let session = SessionId("s-2".to_string());
        let err = engine
            .submit(&session, RawSubmission::default())
            .expect_err("no evidence");
        assert_eq!(err, ValidationError::NoEvidence);
        assert!(engine.current_analysis(&session).is_none());
    }

    #[tokio::test]
    async fn all_abstentions_fail_with_insufficient_signal() {
        let engine =
            AnalysisEngine::with_extractors(vec![Arc::new(AbstainingExtractor)], quick_config());
        let session = SessionId("s-3".to_string());
        let id = engine
            .submit(&session, text_submission("plain listing"))
            .expect("accepted");

        match wait_terminal(&engine, &id).await {
            AnalysisStatus::Failed { reason } => {
                assert!(reason.contains("not enough verifiable signal"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_extractor_times_out_to_abstention() {
        let engine = AnalysisEngine::with_extractors(
            vec![
                Arc::new(FixedExtractor {
                    kind: FactorKind::LanguageAnalysis,
                    severity: Severity::Safe,
                    weight: 1,
                    delay: Duration::from_millis(1),
                }),
                Arc::new(FixedExtractor {
                    kind: FactorKind::ImageAuthenticity,
                    severity: Severity::Danger,
                    weight: 5,
                    delay: Duration::from_secs(30),
                }),
            ],
            quick_config(),
        );
        let session = SessionId("s-4".to_string());
        let id = engine
            .submit(&session, text_submission("quiet street"))
            .expect("accepted");

        match wait_terminal(&engine, &id).await {
            AnalysisStatus::Complete { result } => {
                assert_eq!(result.factors.len(), 1);
                assert_eq!(result.score, 0);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn newer_submission_cancels_the_previous_one() {
        let engine = AnalysisEngine::with_extractors(
            vec![Arc::new(FixedExtractor {
                kind: FactorKind::LanguageAnalysis,
                severity: Severity::Safe,
                weight: 1,
                delay: Duration::from_secs(30),
            })],
            AnalysisConfig {
                extractor_timeout: Duration::from_secs(60),
                ..quick_config()
            },
        );
        let session = SessionId("s-5".to_string());
        let first = engine
            .submit(&session, text_submission("first"))
            .expect("accepted");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = engine
            .submit(&session, text_submission("second"))
            .expect("accepted");

        assert_eq!(engine.get(&first), Some(AnalysisStatus::Cancelled));
        assert_eq!(engine.current_analysis(&session), Some(second.clone()));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn eviction_removes_session_results() {
        let engine = AnalysisEngine::with_extractors(
            vec![Arc::new(FixedExtractor {
                kind: FactorKind::LanguageAnalysis,
                severity: Severity::Safe,
                weight: 1,
                delay: Duration::from_millis(1),
            })],
            quick_config(),
        );
        let session = SessionId("s-6".to_string());
        let id = engine
            .submit(&session, text_submission("hello"))
            .expect("accepted");
        wait_terminal(&engine, &id).await;

        engine.evict_session(&session);
        assert!(engine.get(&id).is_none());
        assert!(engine.current_analysis(&session).is_none());
    }
}
