//! REST API over the MeterBill service

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post, put},
    Router,
};
use futures::stream::Stream;
use meterbill_common::{
    Flat, GlobalSettings, MeterBillError, OcrCandidate, Reading, ReadingStatus, YearMonth, VERSION,
};
use meterbill_engine::billing::MonthlySummary;
use meterbill_engine::store::{FlatUpdate, SettingsUpdate};
use meterbill_engine::MeterBill;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use uuid::Uuid;

// ============ STATE ============

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MeterBill>,
}

// ============ ERRORS ============

/// Service error rendered as a JSON response
pub struct ApiError(MeterBillError);

impl From<MeterBillError> for ApiError {
    fn from(err: MeterBillError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            MeterBillError::Validation(_) => StatusCode::BAD_REQUEST,
            MeterBillError::NotFound(_) => StatusCode::NOT_FOUND,
            MeterBillError::InvalidTransition { .. } => StatusCode::CONFLICT,
            MeterBillError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "Request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============ REQUESTS ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReadingRequest {
    pub flat_id: String,
    pub image_ref: String,
    #[serde(default)]
    pub ocr_reading: Option<Decimal>,
    #[serde(default)]
    pub ocr_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReadingsQuery {
    pub flat_id: Option<String>,
    pub status: Option<ReadingStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub corrected_reading: f64,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFlatRequest {
    pub flat_id: String,
    pub user_id: String,
    #[serde(default)]
    pub tenant_name: Option<String>,
    #[serde(default)]
    pub initial_reading: Option<Decimal>,
}

// ============ ROUTER ============

pub fn router(service: Arc<MeterBill>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    Router::new()
        // Health & ops
        .route("/health", get(health_check))
        .route("/api/v1/version", get(version))
        .route("/metrics", get(metrics))
        // Readings
        .route("/api/v1/readings", get(list_readings).post(submit_reading))
        .route("/api/v1/readings/:id", get(get_reading))
        .route("/api/v1/readings/:id/approve", post(approve_reading))
        .route("/api/v1/readings/:id/reject", post(reject_reading))
        .route("/api/v1/readings/:id/reopen", post(reopen_reading))
        // Billing
        .route("/api/v1/summary/months", get(available_months))
        .route("/api/v1/summary/:year_month", get(monthly_summary))
        // Admin
        .route("/api/v1/settings", get(get_settings).put(update_settings))
        .route("/api/v1/flats", get(list_flats).post(register_flat))
        .route("/api/v1/flats/:flat_id", put(update_flat))
        // Events
        .route("/api/v1/events", get(events))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { service })
}

// ============ HANDLERS ============

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({"version": VERSION}))
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let text = state.service.metrics_text()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    ))
}

async fn submit_reading(
    State(state): State<AppState>,
    Json(req): Json<SubmitReadingRequest>,
) -> Result<(StatusCode, Json<Reading>), ApiError> {
    let candidate = OcrCandidate::new(req.ocr_reading, req.ocr_confidence);
    let reading = state
        .service
        .submit_reading(&req.flat_id, &req.image_ref, candidate)
        .await?;
    Ok((StatusCode::CREATED, Json(reading)))
}

async fn list_readings(
    State(state): State<AppState>,
    Query(query): Query<ListReadingsQuery>,
) -> ApiResult<Vec<Reading>> {
    let readings = state
        .service
        .list_readings(query.flat_id.as_deref(), query.status)
        .await?;
    Ok(Json(readings))
}

async fn get_reading(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Reading> {
    Ok(Json(state.service.get_reading(id).await?))
}

async fn approve_reading(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Reading> {
    Ok(Json(
        state
            .service
            .approve_reading(id, req.corrected_reading)
            .await?,
    ))
}

async fn reject_reading(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Reading> {
    Ok(Json(state.service.reject_reading(id, &req.reason).await?))
}

async fn reopen_reading(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Reading> {
    Ok(Json(state.service.reopen_reading(id, &req.reason).await?))
}

async fn monthly_summary(
    State(state): State<AppState>,
    Path(year_month): Path<String>,
) -> ApiResult<MonthlySummary> {
    let year_month: YearMonth = year_month.parse()?;
    Ok(Json(state.service.monthly_summary(year_month).await?))
}

async fn available_months(State(state): State<AppState>) -> ApiResult<Vec<YearMonth>> {
    Ok(Json(state.service.available_months().await?))
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<GlobalSettings> {
    Ok(Json(state.service.settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<GlobalSettings> {
    Ok(Json(state.service.update_settings(update).await?))
}

async fn list_flats(State(state): State<AppState>) -> ApiResult<Vec<Flat>> {
    Ok(Json(state.service.list_flats().await?))
}

async fn register_flat(
    State(state): State<AppState>,
    Json(req): Json<RegisterFlatRequest>,
) -> Result<(StatusCode, Json<Flat>), ApiError> {
    let mut flat = Flat::new(req.flat_id.trim(), req.user_id);
    flat.tenant_name = req.tenant_name;
    flat.initial_reading = req.initial_reading;
    let flat = state.service.register_flat(flat).await?;
    Ok((StatusCode::CREATED, Json(flat)))
}

async fn update_flat(
    State(state): State<AppState>,
    Path(flat_id): Path<String>,
    Json(update): Json<FlatUpdate>,
) -> ApiResult<Flat> {
    Ok(Json(state.service.update_flat(&flat_id, update).await?))
}

/// Committed reading transitions as server-sent events. Lagging clients
/// skip what they missed.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.service.subscribe()).filter_map(|event| {
        let event = event.ok()?;
        Event::default()
            .event(event.kind.as_str())
            .json_data(&event)
            .ok()
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use meterbill_engine::MeterBillConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> Router {
        let service = MeterBill::in_memory(MeterBillConfig::default()).unwrap();
        service
            .update_settings(SettingsUpdate {
                tariff_per_unit: Some(Decimal::new(75, 1)),
                minimum_price: Some(Decimal::from(25)),
                unit_factor: None,
            })
            .await
            .unwrap();
        service
            .register_flat(Flat::new("A-101", "tenant-a").with_initial_reading(Decimal::from(1000)))
            .await
            .unwrap();
        router(Arc::new(service))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_submit_approve_and_summarize() {
        let app = app().await;

        let (status, reading) = send(
            &app,
            "POST",
            "/api/v1/readings",
            Some(json!({"flatId": "A-101", "imageRef": "img://1", "ocrReading": "1049.5"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(reading["status"], "pending");
        let id = reading["id"].as_str().unwrap().to_string();

        let (status, approved) = send(
            &app,
            "POST",
            &format!("/api/v1/readings/{}/approve", id),
            Some(json!({"correctedReading": 1050})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["status"], "approved");
        assert_eq!(approved["amount"], "862.5");

        let (status, months) = send(&app, "GET", "/api/v1/summary/months", None).await;
        assert_eq!(status, StatusCode::OK);
        let month = months[0].as_str().unwrap().to_string();

        let (status, summary) =
            send(&app, "GET", &format!("/api/v1/summary/{}", month), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["rows"].as_array().unwrap().len(), 1);
        assert_eq!(summary["authoritativeTotal"], "862.5");

        let (status, listed) =
            send(&app, "GET", "/api/v1/readings?flatId=A-101&status=approved", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = app().await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/readings",
            Some(json!({"flatId": "Z-9", "imageRef": "img://1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["retryable"], false);

        let (_, reading) = send(
            &app,
            "POST",
            "/api/v1/readings",
            Some(json!({"flatId": "A-101", "imageRef": "img://1"})),
        )
        .await;
        let id = reading["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/readings/{}/reject", id),
            Some(json!({"reason": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/readings/{}/reopen", id),
            Some(json!({"reason": "wrong digit"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");

        let (status, _) = send(&app, "GET", "/api/v1/summary/2025-13", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let app = app().await;

        let (status, settings) = send(
            &app,
            "PUT",
            "/api/v1/settings",
            Some(json!({"unitFactor": "1.5"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settings["unitFactor"], "1.5");
        assert_eq!(settings["tariffPerUnit"], "7.5");

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/flats",
            Some(json!({"flatId": "S1", "userId": "u-2", "tenantName": "K. Rao"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, flat) = send(
            &app,
            "PUT",
            "/api/v1/flats/S1",
            Some(json!({"initialReading": "42"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(flat["initialReading"], "42");

        let (_, flats) = send(&app, "GET", "/api/v1/flats", None).await;
        let ids: Vec<&str> = flats
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["flatId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["S1", "A-101"]);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = app().await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("meterbill_"));
    }
}
