use crate::infra::{demo_fixture, demo_photo_bytes, services_from, TokenVoterAuthority};
use chrono::Utc;
use clap::Args;
use rentshield::engine::evidence::{ImageUpload, ListingDetails, RawSubmission};
use rentshield::engine::external::{VoterAuthority, VoterId};
use rentshield::engine::orchestrator::AnalysisConfig;
use rentshield::engine::reports::{ReportDraft, ReportKind, SubmitOutcome};
use rentshield::engine::zones::{BoundingBox, ZoneConfig, ZoneRiskAggregator};
use rentshield::engine::{
    AnalysisEngine, AnalysisId, AnalysisStatus, CommunityReportStore, ReportStoreConfig,
    SessionId, Severity,
};
use rentshield::error::AppError;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Skip the community report and zone portion of the demo.
    #[arg(long)]
    pub(crate) skip_reports: bool,
    /// Print the raw analysis payload as JSON instead of the rendered view.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Walks the canned high-risk scenario end to end: submit evidence, watch the
/// analysis land, then file duplicate reports and read the zone back.
pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let services = services_from(demo_fixture(), 4);
    let engine = AnalysisEngine::new(&services, AnalysisConfig::default());

    println!("Listing risk assessment demo");
    println!("Submitting the canned high-risk listing (photo, urgency copy, below-market rent)");

    let session = SessionId("demo-session".to_string());
    let id = engine.submit(&session, demo_submission())?;
    let status = wait_terminal(&engine, &id).await;

    if args.json {
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("Analysis payload unavailable: {err}"),
        }
    } else {
        render_analysis(&status);
    }

    if args.skip_reports {
        return Ok(());
    }

    println!("\nCommunity report demo");
    let zones = Arc::new(ZoneRiskAggregator::new(ZoneConfig::default()));
    let reports =
        CommunityReportStore::new(ReportStoreConfig::default()).with_sink(zones.clone());

    let first = reports.submit(demo_report("Asked to wire deposit before viewing"))?;
    let report_id = match &first {
        SubmitOutcome::Created { report } => {
            println!(
                "- Filed report #{} ({}) at {}",
                report.id.0,
                report.kind.label(),
                report.location.raw
            );
            report.id
        }
        SubmitOutcome::Merged { into, .. } => *into,
    };

    match reports.submit(demo_report("Same broker, same wire demand"))? {
        SubmitOutcome::Merged { into, upvotes } => {
            println!("- Duplicate folded into report #{} ({upvotes} confirmations)", into.0);
        }
        SubmitOutcome::Created { report } => {
            println!("- Second report #{} was not recognized as a duplicate", report.id.0);
        }
    }

    let voters = TokenVoterAuthority;
    if let Ok(Some(voter)) = voters.voter_id("demo-neighbor").await {
        upvote(&reports, report_id, &voter);
    }

    let window = BoundingBox {
        min_lat: 41.0,
        min_lng: -94.0,
        max_lat: 42.0,
        max_lng: -93.0,
    };
    println!("\nZone risk surface around Downtown");
    for zone in zones.zones_in(window, Utc::now()) {
        println!(
            "- {} ({}): score {:.2}, {} report(s)",
            zone.name,
            zone.status.label(),
            zone.risk_score,
            zone.report_count
        );
    }

    Ok(())
}

fn demo_submission() -> RawSubmission {
    RawSubmission {
        images: vec![ImageUpload {
            file_name: "living-room.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: demo_photo_bytes(),
        }],
        url: None,
        text: Some(
            "Stunning Downtown studio. Act now, limited time offer, serious inquiries only!"
                .to_string(),
        ),
        listing: ListingDetails {
            listed_rent: Some(900),
            address: Some("123 Main St, Downtown".to_string()),
            city: Some("Downtown".to_string()),
            bedrooms: Some(1),
            owner_id: Some("owner-demo".to_string()),
            contact: Some("+15155550142".to_string()),
        },
    }
}

fn demo_report(title: &str) -> ReportDraft {
    ReportDraft {
        kind: ReportKind::AdvancePayment,
        title: title.to_string(),
        description: "Broker demanded two months of rent by wire before any viewing.".to_string(),
        location: "123 Main St, Downtown".to_string(),
        coords: None,
    }
}

async fn wait_terminal(engine: &AnalysisEngine, id: &AnalysisId) -> AnalysisStatus {
    loop {
        match engine.get(id) {
            Some(AnalysisStatus::Pending { .. }) => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Some(status) => return status,
            None => return AnalysisStatus::Failed {
                reason: "analysis evicted before completion".to_string(),
            },
        }
    }
}

fn render_analysis(status: &AnalysisStatus) {
    match status {
        AnalysisStatus::Complete { result } => {
            println!(
                "\nRisk score: {} / 100 ({})",
                result.score,
                result.status.label()
            );
            println!("Factors");
            for factor in &result.factors {
                let details = factor
                    .details
                    .as_deref()
                    .map(|d| format!(" | {d}"))
                    .unwrap_or_default();
                println!(
                    "- {} [{}; weight {}]: {}{}",
                    factor.kind.label(),
                    severity_label(factor.severity),
                    factor.weight,
                    factor.description,
                    details
                );
            }
        }
        AnalysisStatus::Failed { reason } => println!("\nAnalysis failed: {reason}"),
        AnalysisStatus::Cancelled => println!("\nAnalysis was cancelled"),
        AnalysisStatus::Pending { .. } => println!("\nAnalysis still pending"),
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Safe => "safe",
        Severity::Warning => "warning",
        Severity::Danger => "danger",
    }
}

fn upvote(reports: &CommunityReportStore, id: rentshield::engine::ReportId, voter: &VoterId) {
    match reports.upvote(id, voter) {
        Ok(upvotes) => println!("- Neighbor confirmed report #{} ({upvotes} total)", id.0),
        Err(err) => println!("- Upvote rejected: {err}"),
    }
}
