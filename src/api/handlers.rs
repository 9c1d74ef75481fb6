use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{AlertEvent, MonitorError, OvercrowdingMonitor};
use crate::data::{Location, NewLocation, NewSample, VisitorSample};
use crate::reports::{
    csv, trailing_days_start, Interest, InterestRecommendation, LocationDailyTotal,
    Recommendation, TrendFilter, TrendReport,
};
use crate::storage::{SqliteStore, StoreError};

const DEFAULT_SAMPLE_LIMIT: usize = 20;
const MAX_SAMPLE_LIMIT: usize = 500;
const DEFAULT_RECOMMENDATIONS: usize = 5;
const INTEREST_RECOMMENDATIONS: usize = 5;
const OWNER_TREND_DAYS: u32 = 7;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub monitor: Arc<OvercrowdingMonitor>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version of the running binary
    pub version: &'static str,
}

/// Liveness check; touches neither the store nor the monitor
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Alerts
// ============================================================================

/// Plain-text reply when the test notification went out
pub const TEST_SENT_BODY: &str = "Test email sent! Check your inbox (and spam).";
/// Plain-text reply when the dispatcher reported a failure
pub const TEST_FAILED_BODY: &str = "Test email failed. Check server console.";

/// Manual delivery check. Unauthenticated, answers in plain text.
pub async fn send_test_alert(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.monitor.send_test().await {
        Ok(()) => (StatusCode::OK, TEST_SENT_BODY),
        Err(e) => {
            tracing::error!(error = %e, "Test notification failed");
            (StatusCode::INTERNAL_SERVER_ERROR, TEST_FAILED_BODY)
        }
    }
}

/// Current breaches together with the policy that produced them
#[derive(Serialize)]
pub struct OvercrowdedResponse {
    pub threshold: i64,
    pub window_minutes: u64,
    /// Every sample over the threshold inside the window, oldest first
    pub locations: Vec<AlertEvent>,
}

/// Dashboard view of what the next cycle would report. Never dispatches.
pub async fn overcrowded(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OvercrowdedResponse>, ApiError> {
    let locations = state.monitor.snapshot().await?;
    let policy = state.monitor.policy();

    Ok(Json(OvercrowdedResponse {
        threshold: policy.threshold,
        window_minutes: policy.window_minutes(),
        locations,
    }))
}

// ============================================================================
// Locations
// ============================================================================

/// All locations ordered by name
pub async fn list_locations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Location>>, ApiError> {
    Ok(Json(state.store.list_locations().await?))
}

/// Register a location; a blank name is a 400
pub async fn create_location(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewLocation>,
) -> Result<(StatusCode, Json<Location>), ApiError> {
    let location = state.store.create_location(request).await?;
    Ok((StatusCode::CREATED, Json(location)))
}

// ============================================================================
// Samples
// ============================================================================

/// Query string for `GET /samples`
#[derive(Debug, Default, Deserialize)]
pub struct SampleQuery {
    /// Latest-entries count, default 20 and capped at 500
    #[serde(default)]
    pub limit: Option<usize>,
    /// Range start (RFC 3339), used only together with `to`
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Range end (RFC 3339), inclusive
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

/// Samples in a time range when both ends are given, else the latest entries
pub async fn list_samples(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SampleQuery>,
) -> Result<Json<Vec<VisitorSample>>, ApiError> {
    let samples = match (query.from, query.to) {
        (Some(from), Some(to)) => {
            if from > to {
                return Err(ApiError::BadRequest(
                    "'from' must not be after 'to'".to_string(),
                ));
            }
            state.store.samples_between(from, to).await?
        }
        _ => {
            let limit = query
                .limit
                .unwrap_or(DEFAULT_SAMPLE_LIMIT)
                .min(MAX_SAMPLE_LIMIT);
            state.store.latest_samples(limit).await?
        }
    };

    Ok(Json(samples))
}

/// Store one visitor count. The timestamp defaults to now.
pub async fn record_sample(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewSample>,
) -> Result<(StatusCode, Json<VisitorSample>), ApiError> {
    let sample = state.store.record_sample(request).await?;
    tracing::debug!(
        location = %sample.location_name,
        visitors = sample.visitor_count,
        "Recorded sample"
    );
    Ok((StatusCode::CREATED, Json(sample)))
}

/// Remove a sample by id; 404 when it does not exist
pub async fn delete_sample(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete_sample(id).await? {
        return Err(ApiError::NotFound(format!("Sample {} not found", id)));
    }

    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Query string for `GET /recommendations`
#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    /// Number of locations to return, default 5
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Quietest locations over the last day
pub async fn recommendations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<Vec<Recommendation>>, ApiError> {
    let since = Utc::now() - Duration::days(1);
    let limit = query.limit.unwrap_or(DEFAULT_RECOMMENDATIONS);
    Ok(Json(state.store.quietest_locations(since, limit).await?))
}

/// Body for `POST /recommendations`
#[derive(Debug, Deserialize)]
pub struct InterestRequest {
    /// One of `nature`, `adventure`, `food`, `historical`
    #[serde(default)]
    pub interest: String,
}

/// Busiest five locations over the last day in the chosen category
pub async fn interest_recommendations(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InterestRequest>,
) -> Result<Json<Vec<InterestRecommendation>>, ApiError> {
    let interest: Interest = request.interest.parse().map_err(|e| {
        tracing::debug!(error = %e, "Rejected recommendation request");
        ApiError::BadRequest("Invalid interest selected".to_string())
    })?;

    let since = Utc::now() - Duration::days(1);
    let rows = state
        .store
        .interest_recommendations(interest, since, INTEREST_RECOMMENDATIONS)
        .await?;
    Ok(Json(rows))
}

// ============================================================================
// Business owner
// ============================================================================

/// Visitors per location per day over the last seven UTC days, today included
pub async fn owner_trend(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LocationDailyTotal>>, ApiError> {
    let since = trailing_days_start(Utc::now(), OWNER_TREND_DAYS);
    Ok(Json(state.store.location_daily_totals(since).await?))
}

// ============================================================================
// Planner
// ============================================================================

/// Regional and daily totals with a next-day prediction
pub async fn planner_trends(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<TrendFilter>,
) -> Result<Json<TrendReport>, ApiError> {
    let regions = state.store.region_totals(filter.clone()).await?;
    let daily = state.store.daily_totals(filter).await?;
    Ok(Json(TrendReport::new(regions, daily)))
}

/// Per-region, per-day totals as a CSV download
pub async fn planner_report_csv(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.store.region_daily_totals().await?;
    tracing::info!(records = rows.len(), "Exporting planner report");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"planner_report.csv\"",
            ),
        ],
        csv::render_region_daily(&rows),
    ))
}

// ============================================================================
// Error Handling
// ============================================================================

/// Handler failure, rendered as `{"error": message}` with a matching status
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LocationNotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "Store operation failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        tracing::error!(error = %e, "Overcrowding check failed");
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
