//! End-to-end specifications for the community report store feeding the zone
//! risk surface.

use std::sync::Arc;

use chrono::{Duration, Utc};

use rentshield::engine::external::VoterId;
use rentshield::engine::reports::{
    CommunityReportStore, ReportDraft, ReportError, ReportKind, ReportStoreConfig, SubmitOutcome,
};
use rentshield::engine::zones::{BoundingBox, GeoPoint, ZoneConfig, ZoneRiskAggregator};
use rentshield::engine::RiskStatus;

fn wired_store() -> (CommunityReportStore, Arc<ZoneRiskAggregator>) {
    let zones = Arc::new(ZoneRiskAggregator::new(ZoneConfig::default()));
    let store = CommunityReportStore::new(ReportStoreConfig::default()).with_sink(zones.clone());
    (store, zones)
}

fn draft(kind: ReportKind, location: &str, coords: Option<GeoPoint>) -> ReportDraft {
    ReportDraft {
        kind,
        title: "Broker demanded 3 months upfront".to_string(),
        description: "Asked to wire rent and deposit before any agreement.".to_string(),
        location: location.to_string(),
        coords,
    }
}

fn downtown() -> GeoPoint {
    GeoPoint {
        lat: 41.5868,
        lng: -93.625,
    }
}

fn wide_bbox() -> BoundingBox {
    BoundingBox {
        min_lat: -90.0,
        min_lng: -180.0,
        max_lat: 90.0,
        max_lng: 180.0,
    }
}

#[test]
fn accepted_reports_surface_as_zones() {
    let (store, zones) = wired_store();
    store
        .submit(draft(
            ReportKind::FakeListing,
            "123 Main St, Downtown",
            Some(downtown()),
        ))
        .expect("accepted");

    let surfaced = zones.zones_in(wide_bbox(), Utc::now());
    assert_eq!(surfaced.len(), 1);
    assert_eq!(surfaced[0].status, RiskStatus::Danger);
    assert_eq!(surfaced[0].report_count, 1);
}

#[test]
fn merged_duplicates_do_not_double_count_on_the_surface() {
    let (store, zones) = wired_store();
    let coords = Some(downtown());
    store
        .submit(draft(ReportKind::AdvancePayment, "456 Oak Ave", coords))
        .expect("accepted");
    let merged = store
        .submit(draft(ReportKind::AdvancePayment, "456 Oak Ave", coords))
        .expect("accepted");
    assert!(matches!(merged, SubmitOutcome::Merged { upvotes: 2, .. }));

    let surfaced = zones.zones_in(wide_bbox(), Utc::now());
    assert_eq!(surfaced.len(), 1);
    assert_eq!(
        surfaced[0].report_count, 1,
        "the merged duplicate adds upvotes, not zone weight"
    );
}

#[test]
fn reports_without_coordinates_stay_off_the_surface() {
    let (store, zones) = wired_store();
    store
        .submit(draft(ReportKind::WrongAddress, "somewhere vague", None))
        .expect("accepted");
    assert!(zones.zones_in(wide_bbox(), Utc::now()).is_empty());
    assert_eq!(store.list(None).count(), 1);
}

#[test]
fn upvote_counts_are_monotonic_across_distinct_voters() {
    let (store, _zones) = wired_store();
    let report = match store
        .submit(draft(ReportKind::FakeOwner, "789 Pine Rd", None))
        .expect("accepted")
    {
        SubmitOutcome::Created { report } => report,
        other => panic!("expected creation, got {other:?}"),
    };

    let mut last = report.upvotes;
    for n in 0..5 {
        let voter = VoterId(format!("voter-{n}"));
        let count = store.upvote(report.id, &voter).expect("distinct voter");
        assert!(count > last);
        last = count;
    }

    let repeat = VoterId("voter-0".to_string());
    assert_eq!(
        store.upvote(report.id, &repeat),
        Err(ReportError::DuplicateVote)
    );
    assert_eq!(store.get(report.id).expect("present").upvotes, last);
}

#[test]
fn sweep_decays_zones_between_reports() {
    let (store, zones) = wired_store();
    let created = Utc::now() - Duration::days(120);
    store
        .submit_at(
            draft(ReportKind::FakeListing, "old corner", Some(downtown())),
            created,
        )
        .expect("accepted");

    // Weight 3 decays through four half-lives to under the safe threshold.
    let now = Utc::now();
    zones.sweep(now);
    let surfaced = zones.zones_in(wide_bbox(), now);
    assert_eq!(surfaced.len(), 1);
    assert_eq!(surfaced[0].status, RiskStatus::Safe);
}
