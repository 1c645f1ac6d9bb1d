use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::external::VoterId;
use super::zones::GeoPoint;

/// The fraud categories the community can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    FakeListing,
    AdvancePayment,
    WrongAddress,
    FakeOwner,
}

impl ReportKind {
    pub const fn label(self) -> &'static str {
        match self {
            ReportKind::FakeListing => "fake_listing",
            ReportKind::AdvancePayment => "advance_payment",
            ReportKind::WrongAddress => "wrong_address",
            ReportKind::FakeOwner => "fake_owner",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ReportError> {
        match value {
            "fake_listing" => Ok(ReportKind::FakeListing),
            "advance_payment" => Ok(ReportKind::AdvancePayment),
            "wrong_address" => Ok(ReportKind::WrongAddress),
            "fake_owner" => Ok(ReportKind::FakeOwner),
            other => Err(ReportError::UnknownKind(other.to_string())),
        }
    }
}

/// Monotonically increasing report identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ReportId(pub u64);

/// Where the reported listing claims to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coords: Option<GeoPoint>,
}

/// One community-submitted fraud report. Records are append-only; a report
/// absorbed by an earlier duplicate stays in the log with `merged_into` set
/// and is excluded from listings and tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub id: ReportId,
    pub kind: ReportKind,
    pub title: String,
    pub description: String,
    pub location: ReportLocation,
    pub created_at: DateTime<Utc>,
    pub upvotes: u32,
    pub comment_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<ReportId>,
}

/// Submission payload before the store assigns an id and timestamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub kind: ReportKind,
    pub title: String,
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub coords: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("report field '{0}' must not be empty")]
    MissingField(&'static str),
    #[error("unknown report type '{0}'")]
    UnknownKind(String),
    #[error("report not found")]
    NotFound,
    #[error("voter already upvoted this report")]
    DuplicateVote,
}

/// Result of a submission: a fresh report, or a merge into a recent duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Created { report: CommunityReport },
    Merged { into: ReportId, upvotes: u32 },
}

/// Dedup and merge thresholds.
#[derive(Debug, Clone)]
pub struct ReportStoreConfig {
    /// Reports of the same kind within this distance are considered the same
    /// incident.
    pub merge_radius_meters: f64,
    /// Only reports created within this window absorb duplicates.
    pub merge_window_hours: i64,
}

impl Default for ReportStoreConfig {
    fn default() -> Self {
        Self {
            merge_radius_meters: 250.0,
            merge_window_hours: 48,
        }
    }
}

/// Downstream consumer of accepted (non-merged) reports. The zone risk
/// aggregator implements this.
pub trait ReportSink: Send + Sync {
    fn accepted(&self, report: &CommunityReport);
}

struct StoreInner {
    reports: Vec<CommunityReport>,
    votes: HashSet<(ReportId, VoterId)>,
}

/// Process-wide store of community reports. All mutation goes through one
/// lock, so id assignment and upvote increments are linearizable.
pub struct CommunityReportStore {
    config: ReportStoreConfig,
    sequence: AtomicU64,
    inner: Mutex<StoreInner>,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl CommunityReportStore {
    pub fn new(config: ReportStoreConfig) -> Self {
        Self {
            config,
            sequence: AtomicU64::new(1),
            inner: Mutex::new(StoreInner {
                reports: Vec::new(),
                votes: HashSet::new(),
            }),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn submit(&self, draft: ReportDraft) -> Result<SubmitOutcome, ReportError> {
        self.submit_at(draft, Utc::now())
    }

    /// Timestamp-explicit variant used by tests and replays.
    pub fn submit_at(
        &self,
        draft: ReportDraft,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, ReportError> {
        validate_draft(&draft)?;

        let outcome = {
            let mut inner = self.inner.lock().expect("report store mutex poisoned");

            if let Some(target) = self.find_merge_target(&inner.reports, &draft, now) {
                let tombstone_id = ReportId(self.sequence.fetch_add(1, Ordering::Relaxed));
                let target_idx = inner
                    .reports
                    .iter()
                    .position(|r| r.id == target)
                    .expect("merge target present");
                // Fold the submitter's upvote intent into the target; append
                // the absorbed submission as a tombstone for the audit log.
                inner.reports[target_idx].upvotes += 1;
                let upvotes = inner.reports[target_idx].upvotes;
                inner.reports.push(CommunityReport {
                    id: tombstone_id,
                    kind: draft.kind,
                    title: draft.title,
                    description: draft.description,
                    location: ReportLocation {
                        raw: draft.location,
                        coords: draft.coords,
                    },
                    created_at: now,
                    upvotes: 0,
                    comment_count: 0,
                    merged_into: Some(target),
                });
                info!(target = target.0, "duplicate report merged");
                SubmitOutcome::Merged {
                    into: target,
                    upvotes,
                }
            } else {
                let id = ReportId(self.sequence.fetch_add(1, Ordering::Relaxed));
                let report = CommunityReport {
                    id,
                    kind: draft.kind,
                    title: draft.title,
                    description: draft.description,
                    location: ReportLocation {
                        raw: draft.location,
                        coords: draft.coords,
                    },
                    created_at: now,
                    // The reporter's own intent counts as the first upvote.
                    upvotes: 1,
                    comment_count: 0,
                    merged_into: None,
                };
                inner.reports.push(report.clone());
                info!(report = id.0, kind = report.kind.label(), "report accepted");
                SubmitOutcome::Created { report }
            }
        };

        if let SubmitOutcome::Created { report } = &outcome {
            for sink in &self.sinks {
                sink.accepted(report);
            }
        }
        Ok(outcome)
    }

    /// One upvote per voter per report. Upvotes on a merged id follow the
    /// merge chain to the surviving report.
    pub fn upvote(&self, id: ReportId, voter: &VoterId) -> Result<u32, ReportError> {
        let mut inner = self.inner.lock().expect("report store mutex poisoned");

        let target = resolve_merge_chain(&inner.reports, id).ok_or(ReportError::NotFound)?;
        if !inner.votes.insert((target, voter.clone())) {
            return Err(ReportError::DuplicateVote);
        }

        let report = inner
            .reports
            .iter_mut()
            .find(|r| r.id == target)
            .expect("resolved report present");
        report.upvotes += 1;
        debug!(report = target.0, upvotes = report.upvotes, "upvote recorded");
        Ok(report.upvotes)
    }

    /// Newest-first snapshot of unmerged reports, lazily filtered. Restart by
    /// calling again.
    pub fn list(&self, filter: Option<ReportKind>) -> impl Iterator<Item = CommunityReport> {
        let mut snapshot: Vec<CommunityReport> = {
            let inner = self.inner.lock().expect("report store mutex poisoned");
            inner
                .reports
                .iter()
                .filter(|r| r.merged_into.is_none())
                .cloned()
                .collect()
        };
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        snapshot
            .into_iter()
            .filter(move |r| filter.map(|kind| r.kind == kind).unwrap_or(true))
    }

    pub fn get(&self, id: ReportId) -> Option<CommunityReport> {
        let inner = self.inner.lock().expect("report store mutex poisoned");
        inner.reports.iter().find(|r| r.id == id).cloned()
    }

    fn find_merge_target(
        &self,
        reports: &[CommunityReport],
        draft: &ReportDraft,
        now: DateTime<Utc>,
    ) -> Option<ReportId> {
        let window = Duration::hours(self.config.merge_window_hours);
        reports
            .iter()
            .filter(|existing| existing.merged_into.is_none() && existing.kind == draft.kind)
            .filter(|existing| now - existing.created_at <= window)
            .find(|existing| self.same_location(existing, draft))
            .map(|existing| existing.id)
    }

    fn same_location(&self, existing: &CommunityReport, draft: &ReportDraft) -> bool {
        match (existing.location.coords, draft.coords) {
            (Some(a), Some(b)) => haversine_meters(a, b) <= self.config.merge_radius_meters,
            _ => normalized(&existing.location.raw) == normalized(&draft.location),
        }
    }
}

fn validate_draft(draft: &ReportDraft) -> Result<(), ReportError> {
    if draft.title.trim().is_empty() {
        return Err(ReportError::MissingField("title"));
    }
    if draft.description.trim().is_empty() {
        return Err(ReportError::MissingField("description"));
    }
    if draft.location.trim().is_empty() {
        return Err(ReportError::MissingField("location"));
    }
    Ok(())
}

fn resolve_merge_chain(reports: &[CommunityReport], id: ReportId) -> Option<ReportId> {
    let mut current = reports.iter().find(|r| r.id == id)?;
    while let Some(next) = current.merged_into {
        current = reports.iter().find(|r| r.id == next)?;
    }
    Some(current.id)
}

fn normalized(location: &str) -> String {
    location.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Great-circle distance between two points, good enough for a merge radius.
fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(kind: ReportKind, location: &str, coords: Option<GeoPoint>) -> ReportDraft {
        ReportDraft {
            kind,
            title: "Suspicious studio in Downtown".to_string(),
            description: "Owner asked for a deposit before any viewing.".to_string(),
            location: location.to_string(),
            coords,
        }
    }

    fn store() -> CommunityReportStore {
        CommunityReportStore::new(ReportStoreConfig::default())
    }

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    #[test]
    fn rejects_empty_fields() {
        let s = store();
        let mut bad = draft(ReportKind::FakeListing, "123 Main St", None);
        bad.title = "  ".to_string();
        assert_eq!(s.submit(bad), Err(ReportError::MissingField("title")));
    }

    #[test]
    fn ids_increase_monotonically() {
        let s = store();
        let mut last = 0;
        for i in 0..3 {
            match s
                .submit(draft(ReportKind::WrongAddress, &format!("{i} Elm St"), None))
                .expect("accepted")
            {
                SubmitOutcome::Created { report } => {
                    assert!(report.id.0 > last);
                    last = report.id.0;
                }
                other => panic!("expected creation, got {other:?}"),
            }
        }
    }

    #[test]
    fn nearby_same_kind_reports_merge_with_summed_intents() {
        let s = store();
        let first = match s
            .submit(draft(
                ReportKind::FakeListing,
                "123 Main St, Downtown",
                Some(point(41.5868, -93.6250)),
            ))
            .expect("accepted")
        {
            SubmitOutcome::Created { report } => report,
            other => panic!("expected creation, got {other:?}"),
        };
        assert_eq!(first.upvotes, 1);

        // ~100m away, same kind, inside the recency window.
        match s
            .submit(draft(
                ReportKind::FakeListing,
                "125 Main St, Downtown",
                Some(point(41.5877, -93.6250)),
            ))
            .expect("accepted")
        {
            SubmitOutcome::Merged { into, upvotes } => {
                assert_eq!(into, first.id);
                assert_eq!(upvotes, 2);
            }
            other => panic!("expected merge, got {other:?}"),
        }

        // The tombstone is excluded from listings.
        assert_eq!(s.list(None).count(), 1);
    }

    #[test]
    fn different_kind_does_not_merge() {
        let s = store();
        let coords = Some(point(41.5868, -93.6250));
        s.submit(draft(ReportKind::FakeListing, "123 Main St", coords))
            .expect("accepted");
        match s
            .submit(draft(ReportKind::AdvancePayment, "123 Main St", coords))
            .expect("accepted")
        {
            SubmitOutcome::Created { .. } => {}
            other => panic!("expected creation, got {other:?}"),
        }
    }

    #[test]
    fn stale_reports_do_not_absorb_new_ones() {
        let s = store();
        let old = Utc::now() - Duration::hours(72);
        s.submit_at(
            draft(ReportKind::FakeListing, "123 Main St", None),
            old,
        )
        .expect("accepted");
        match s
            .submit(draft(ReportKind::FakeListing, "123 Main St", None))
            .expect("accepted")
        {
            SubmitOutcome::Created { .. } => {}
            other => panic!("expected creation, got {other:?}"),
        }
    }

    #[test]
    fn raw_location_match_is_whitespace_and_case_insensitive() {
        let s = store();
        s.submit(draft(ReportKind::FakeOwner, "456 Oak Ave, Westside", None))
            .expect("accepted");
        match s
            .submit(draft(ReportKind::FakeOwner, "  456  oak ave,  westside ", None))
            .expect("accepted")
        {
            SubmitOutcome::Merged { .. } => {}
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn upvotes_are_deduplicated_per_voter() {
        let s = store();
        let report = match s
            .submit(draft(ReportKind::AdvancePayment, "456 Oak Ave", None))
            .expect("accepted")
        {
            SubmitOutcome::Created { report } => report,
            other => panic!("expected creation, got {other:?}"),
        };

        let alice = VoterId("voter-alice".to_string());
        let bob = VoterId("voter-bob".to_string());
        assert_eq!(s.upvote(report.id, &alice), Ok(2));
        assert_eq!(s.upvote(report.id, &bob), Ok(3));
        assert_eq!(s.upvote(report.id, &alice), Err(ReportError::DuplicateVote));
        assert_eq!(
            s.get(report.id).expect("report present").upvotes,
            3,
            "rejected vote must not change the count"
        );
    }

    #[test]
    fn upvoting_a_merged_id_follows_the_chain() {
        let s = store();
        let coords = Some(point(41.0, -93.0));
        let original = match s
            .submit(draft(ReportKind::FakeListing, "1 A St", coords))
            .expect("accepted")
        {
            SubmitOutcome::Created { report } => report,
            other => panic!("expected creation, got {other:?}"),
        };
        s.submit(draft(ReportKind::FakeListing, "1 A St", coords))
            .expect("merged");

        let tombstone_id = ReportId(original.id.0 + 1);
        let voter = VoterId("voter-1".to_string());
        assert_eq!(s.upvote(tombstone_id, &voter), Ok(3));
        assert_eq!(s.get(original.id).expect("present").upvotes, 3);
    }

    #[test]
    fn unknown_report_is_not_found() {
        let s = store();
        let voter = VoterId("voter-1".to_string());
        assert_eq!(s.upvote(ReportId(999), &voter), Err(ReportError::NotFound));
    }

    #[test]
    fn list_is_newest_first_and_filterable() {
        let s = store();
        let t0 = Utc::now() - Duration::hours(100);
        s.submit_at(draft(ReportKind::FakeListing, "1 A St", None), t0)
            .expect("accepted");
        s.submit_at(
            draft(ReportKind::AdvancePayment, "2 B St", None),
            t0 + Duration::hours(1),
        )
        .expect("accepted");
        s.submit_at(
            draft(ReportKind::WrongAddress, "3 C St", None),
            t0 + Duration::hours(2),
        )
        .expect("accepted");

        let all: Vec<_> = s.list(None).collect();
        assert_eq!(all.len(), 3);
        assert!(all[0].created_at > all[2].created_at);

        let only_payment: Vec<_> = s.list(Some(ReportKind::AdvancePayment)).collect();
        assert_eq!(only_payment.len(), 1);
        assert_eq!(only_payment[0].kind, ReportKind::AdvancePayment);

        // Restartable: a second listing yields the same sequence.
        let again: Vec<_> = s.list(None).collect();
        assert_eq!(all, again);
    }

    #[test]
    fn kind_parsing_round_trips_labels() {
        for kind in [
            ReportKind::FakeListing,
            ReportKind::AdvancePayment,
            ReportKind::WrongAddress,
            ReportKind::FakeOwner,
        ] {
            assert_eq!(ReportKind::parse(kind.label()), Ok(kind));
        }
        assert!(matches!(
            ReportKind::parse("haunted"),
            Err(ReportError::UnknownKind(_))
        ));
    }
}
