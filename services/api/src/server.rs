use crate::cli::ServeArgs;
use crate::infra::{services_from, AppState, FixtureDirectory, TokenVoterAuthority};
use crate::routes::{api_router, ApiContext};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use rentshield::config::AppConfig;
use rentshield::engine::zones::ZoneRiskAggregator;
use rentshield::engine::{AnalysisEngine, CommunityReportStore};
use rentshield::error::AppError;
use rentshield::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Cadence of the background decay sweep; zones drift back toward safe even
/// when nobody queries them.
const ZONE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = FixtureDirectory::default();
    let services = services_from(directory.clone(), config.analysis.max_concurrent_lookups);
    let zones = Arc::new(ZoneRiskAggregator::new(config.zones.clone()));
    let context = Arc::new(ApiContext {
        engine: AnalysisEngine::new(&services, config.analysis.clone()),
        reports: CommunityReportStore::new(config.reports.clone()).with_sink(zones.clone()),
        zones: zones.clone(),
        voters: Arc::new(TokenVoterAuthority),
        geocoder: Some(Arc::new(directory)),
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ZONE_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            zones.sweep(Utc::now());
        }
    });

    let app = api_router(context)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "listing risk assessment service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
