/**
 * API REST BATTERY - Surface HTTP du kernel
 *
 * ROLE :
 * Thin axum layer over the ingestion gate and the two stores. Handlers only
 * translate HTTP to kernel calls and kernel outcomes to status codes.
 *
 * ROUTES :
 * - GET  /health                          liveness of the process itself
 * - POST /telemetry                       201 | 422 | 429 | 500
 * - GET  /devices, /devices/{id}          registry views with staleness
 * - GET  /devices/{id}/telemetry          rows in [start, end], default last 24h
 * - GET  /devices/{id}/summary?date=      min/max/avg per metric for a UTC day
 * - GET  /alerts?device_id=               offline alerts, newest first
 *
 * ERRORS :
 * Every non-2xx body is `{"detail": ..., "errors": [...]?}`.
 */

use crate::error::{FieldError, KernelError};
use crate::ingest::IngestionGate;
use crate::limiter::Admission;
use crate::models::{rfc3339, Alert, Device, DeviceStatus, TelemetryMetrics, TelemetryRecord, TelemetrySubmission};
use crate::store::{AlertStore, TelemetryStore};
use crate::summary::{check_range, daily_summary, day_bounds, MetricSummary};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub gate: IngestionGate,
    pub devices: Arc<dyn TelemetryStore>,
    pub alerts: Arc<dyn AlertStore>,
    /// Used for the `stale` flag of device views.
    pub staleness_threshold: time::Duration,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telemetry", post(post_telemetry))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/telemetry", get(get_telemetry))
        .route("/devices/{id}/summary", get(get_summary))
        .route("/alerts", get(list_alerts))
        .with_state(app_state)
}

// ---------- erreurs ----------

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(Vec<FieldError>),
    NotFound(&'static str),
    RateLimited,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, errors) = match self {
            ApiError::Validation(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "Validation error".to_string(), Some(errors))
            }
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found"), None),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".to_string(), None),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), None),
        };
        (status, Json(ErrorBody { detail, errors })).into_response()
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Validation(errors) => ApiError::Validation(errors),
            // Already logged with context where it happened.
            KernelError::Store { .. } => ApiError::Internal,
        }
    }
}

fn store_failure(operation: &'static str) -> impl FnOnce(crate::error::StoreError) -> ApiError {
    move |e| {
        error!(operation, error = %e, "store read failed");
        ApiError::Internal
    }
}

// ---------- vues ----------

#[derive(Debug, Serialize)]
struct DeviceView {
    device_id: String,
    last_seen: String,
    status: DeviceStatus,
    stale: bool,
    stale_for_seconds: i64,
}

fn to_view(d: &Device, now: OffsetDateTime, staleness: time::Duration) -> DeviceView {
    let age = now - d.last_seen;
    DeviceView {
        device_id: d.device_id.clone(),
        last_seen: rfc3339(d.last_seen),
        status: d.status,
        stale: age > staleness,
        stale_for_seconds: age.whole_seconds().max(0),
    }
}

#[derive(Debug, Serialize)]
struct TelemetryRow {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(flatten)]
    metrics: TelemetryMetrics,
}

impl From<TelemetryRecord> for TelemetryRow {
    fn from(r: TelemetryRecord) -> Self {
        Self { timestamp: r.timestamp, metrics: r.metrics }
    }
}

#[derive(Debug, Serialize)]
struct TelemetryResponse {
    device_id: String,
    data: Vec<TelemetryRow>,
}

#[derive(Debug, Serialize)]
struct DailySummaryResponse {
    device_id: String,
    date: String,
    summary: BTreeMap<String, MetricSummary>,
}

// ---------- handlers ----------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// POST /telemetry
async fn post_telemetry(
    State(app): State<AppState>,
    body: Result<Json<TelemetrySubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(submission) = body.map_err(|rejection| {
        ApiError::Validation(vec![FieldError::new(&["body"], rejection.body_text(), "json_invalid")])
    })?;

    match app.gate.submit(submission, Instant::now()).await? {
        Admission::Admitted => Ok((StatusCode::CREATED, Json(serde_json::json!({ "status": "created" })))),
        Admission::RateLimited => Err(ApiError::RateLimited),
    }
}

// GET /devices
async fn list_devices(State(app): State<AppState>) -> Result<Json<Vec<DeviceView>>, ApiError> {
    let devices = app.devices.list_devices().await.map_err(store_failure("list_devices"))?;
    let now = OffsetDateTime::now_utc();
    Ok(Json(devices.iter().map(|d| to_view(d, now, app.staleness_threshold)).collect()))
}

// GET /devices/{id}
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, ApiError> {
    let device = find_device(&app, &id).await?;
    Ok(Json(to_view(&device, OffsetDateTime::now_utc(), app.staleness_threshold)))
}

async fn find_device(app: &AppState, id: &str) -> Result<Device, ApiError> {
    app.devices
        .get_device(id)
        .await
        .map_err(store_failure("get_device"))?
        .ok_or(ApiError::NotFound("Device"))
}

#[derive(Debug, Default, Deserialize)]
struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

fn parse_instant(field: &str, raw: &str) -> Result<OffsetDateTime, FieldError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| {
        FieldError::new(&["query", field], "value must be an RFC 3339 datetime", "datetime_parsing")
    })
}

/// Explicit bounds win; a missing `end` is now, a missing `start` is `end - 24h`.
fn resolve_range(params: &RangeParams, now: OffsetDateTime) -> Result<(OffsetDateTime, OffsetDateTime), ApiError> {
    let mut errors = Vec::new();
    let end = match params.end.as_deref().map(|raw| parse_instant("end", raw)) {
        Some(Ok(at)) => at,
        Some(Err(e)) => {
            errors.push(e);
            now
        }
        None => now,
    };
    let start = match params.start.as_deref().map(|raw| parse_instant("start", raw)) {
        Some(Ok(at)) => at,
        Some(Err(e)) => {
            errors.push(e);
            end
        }
        None => end - time::Duration::hours(24),
    };
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    check_range(start, end).map_err(ApiError::Validation)?;
    Ok((start, end))
}

// GET /devices/{id}/telemetry?start=&end=
async fn get_telemetry(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<TelemetryResponse>, ApiError> {
    let (start, end) = resolve_range(&params, OffsetDateTime::now_utc())?;
    let device = find_device(&app, &id).await?;
    let rows = app
        .devices
        .telemetry_range(&device.device_id, start, end)
        .await
        .map_err(store_failure("telemetry_range"))?;
    Ok(Json(TelemetryResponse {
        device_id: device.device_id,
        data: rows.into_iter().map(TelemetryRow::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    date: Option<String>,
}

fn parse_date(raw: Option<&str>) -> Result<Date, ApiError> {
    let Some(raw) = raw else {
        return Err(ApiError::Validation(vec![FieldError::new(
            &["query", "date"],
            "field required",
            "missing",
        )]));
    };
    Date::parse(raw, format_description!("[year]-[month]-[day]")).map_err(|_| {
        ApiError::Validation(vec![FieldError::new(
            &["query", "date"],
            "value must be a date formatted YYYY-MM-DD",
            "date_parsing",
        )])
    })
}

fn bounds_of(date: Date) -> Result<(OffsetDateTime, OffsetDateTime), ApiError> {
    day_bounds(date).ok_or_else(|| {
        ApiError::Validation(vec![FieldError::new(
            &["query", "date"],
            "date is out of the supported range",
            "value_error",
        )])
    })
}

// GET /devices/{id}/summary?date=YYYY-MM-DD
async fn get_summary(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<DailySummaryResponse>, ApiError> {
    let date = parse_date(params.date.as_deref())?;
    let (start, end) = bounds_of(date)?;
    let device = find_device(&app, &id).await?;

    let rows = app
        .devices
        .telemetry_range(&device.device_id, start, end)
        .await
        .map_err(store_failure("telemetry_range"))?;
    let summary = daily_summary(date, &rows).ok_or(ApiError::NotFound("Telemetry for date"))?;

    Ok(Json(DailySummaryResponse {
        device_id: device.device_id,
        date: date.to_string(),
        summary,
    }))
}

#[derive(Debug, Deserialize)]
struct AlertParams {
    device_id: Option<String>,
}

// GET /alerts?device_id=
async fn list_alerts(
    State(app): State<AppState>,
    Query(params): Query<AlertParams>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let alerts = app
        .alerts
        .list_alerts(params.device_id.as_deref())
        .await
        .map_err(store_failure("list_alerts"))?;
    Ok(Json(alerts))
}
