use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use rentshield::engine::evidence::{ImageUpload, ListingDetails, RawSubmission, ValidationError};
use rentshield::engine::external::{Geocoder, VoterAuthority};
use rentshield::engine::reports::{ReportDraft, ReportId, ReportKind, SubmitOutcome};
use rentshield::engine::zones::{BoundingBox, GeoPoint, ZoneRiskAggregator};
use rentshield::engine::{AnalysisEngine, AnalysisId, CommunityReportStore, SessionId};
use rentshield::error::AppError;

use crate::infra::AppState;

/// Everything the HTTP surface needs, shared across requests.
pub(crate) struct ApiContext {
    pub(crate) engine: AnalysisEngine,
    pub(crate) reports: CommunityReportStore,
    pub(crate) zones: Arc<ZoneRiskAggregator>,
    pub(crate) voters: Arc<dyn VoterAuthority>,
    pub(crate) geocoder: Option<Arc<dyn Geocoder>>,
}

pub(crate) fn api_router(context: Arc<ApiContext>) -> Router {
    Router::new()
        .route(
            "/api/v1/listings/analyses",
            post(submit_analysis_endpoint),
        )
        .route(
            "/api/v1/listings/analyses/:analysis_id",
            get(analysis_status_endpoint),
        )
        .route(
            "/api/v1/sessions/:session_id/analyses",
            delete(evict_session_endpoint),
        )
        .route(
            "/api/v1/reports",
            post(submit_report_endpoint).get(list_reports_endpoint),
        )
        .route("/api/v1/reports/:report_id/upvotes", post(upvote_endpoint))
        .route("/api/v1/zones", get(zones_endpoint))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(context)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImagePayload {
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    /// Base64-encoded file contents.
    pub(crate) data: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnalyzeRequest {
    pub(crate) session_id: String,
    #[serde(default)]
    pub(crate) images: Vec<ImagePayload>,
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) listing: ListingDetails,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportRequest {
    pub(crate) kind: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) location: String,
    #[serde(default)]
    pub(crate) coords: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpvoteRequest {
    pub(crate) session_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportListQuery {
    #[serde(default)]
    pub(crate) kind: Option<String>,
}

pub(crate) async fn submit_analysis_endpoint(
    State(context): State<Arc<ApiContext>>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Response, AppError> {
    let AnalyzeRequest {
        session_id,
        images,
        url,
        text,
        listing,
    } = payload;

    let images = images
        .into_iter()
        .map(decode_image)
        .collect::<Result<Vec<_>, ValidationError>>()?;

    let raw = RawSubmission {
        images,
        url,
        text,
        listing,
    };
    let id = context.engine.submit(&SessionId(session_id), raw)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "analysis_id": id }))).into_response())
}

fn decode_image(payload: ImagePayload) -> Result<ImageUpload, ValidationError> {
    let bytes = BASE64
        .decode(payload.data.as_bytes())
        .map_err(|_| ValidationError::UnsupportedMedia {
            file_name: payload.file_name.clone(),
            reason: "invalid base64 payload".to_string(),
        })?;
    Ok(ImageUpload {
        file_name: payload.file_name,
        content_type: payload.content_type,
        bytes,
    })
}

pub(crate) async fn analysis_status_endpoint(
    State(context): State<Arc<ApiContext>>,
    Path(analysis_id): Path<String>,
) -> Response {
    match context.engine.get(&AnalysisId(analysis_id)) {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "analysis not found" })),
        )
            .into_response(),
    }
}

pub(crate) async fn evict_session_endpoint(
    State(context): State<Arc<ApiContext>>,
    Path(session_id): Path<String>,
) -> StatusCode {
    context.engine.evict_session(&SessionId(session_id));
    StatusCode::NO_CONTENT
}

pub(crate) async fn submit_report_endpoint(
    State(context): State<Arc<ApiContext>>,
    Json(payload): Json<ReportRequest>,
) -> Result<Response, AppError> {
    let ReportRequest {
        kind,
        title,
        description,
        location,
        coords,
    } = payload;
    let kind = ReportKind::parse(&kind)?;

    // Best effort: an unresolvable address still produces a listed report, it
    // just never reaches the zone surface.
    let coords = match (coords, &context.geocoder) {
        (Some(point), _) => Some(point),
        (None, Some(geocoder)) => geocoder
            .resolve(&location)
            .await
            .ok()
            .flatten()
            .map(|resolved| GeoPoint {
                lat: resolved.lat,
                lng: resolved.lng,
            }),
        (None, None) => None,
    };

    let outcome = context.reports.submit(ReportDraft {
        kind,
        title,
        description,
        location,
        coords,
    })?;
    let status = match &outcome {
        SubmitOutcome::Created { .. } => StatusCode::CREATED,
        SubmitOutcome::Merged { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)).into_response())
}

pub(crate) async fn upvote_endpoint(
    State(context): State<Arc<ApiContext>>,
    Path(report_id): Path<u64>,
    Json(payload): Json<UpvoteRequest>,
) -> Result<Response, AppError> {
    let voter = match context.voters.voter_id(&payload.session_token).await {
        Ok(Some(voter)) => voter,
        Ok(None) | Err(_) => {
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "session token not recognized" })),
            )
                .into_response());
        }
    };

    let upvotes = context.reports.upvote(ReportId(report_id), &voter)?;
    Ok(Json(json!({ "report_id": report_id, "upvotes": upvotes })).into_response())
}

pub(crate) async fn list_reports_endpoint(
    State(context): State<Arc<ApiContext>>,
    Query(query): Query<ReportListQuery>,
) -> Result<Response, AppError> {
    let filter = match query.kind.as_deref() {
        Some(kind) => Some(ReportKind::parse(kind)?),
        None => None,
    };
    let reports: Vec<_> = context.reports.list(filter).collect();
    Ok(Json(reports).into_response())
}

pub(crate) async fn zones_endpoint(
    State(context): State<Arc<ApiContext>>,
    Query(bbox): Query<BoundingBox>,
) -> Response {
    let zones = context.zones.zones_in(bbox, Utc::now());
    Json(zones).into_response()
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
