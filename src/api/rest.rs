use crate::aggregate::HourlyBucket;
use crate::api::websocket::{ws_dashboard, ws_status, ws_violations};
use crate::cache::Freshness;
use crate::config::ApiConfig;
use crate::context::{AppContext, HealthReport};
use crate::correlation::{CorrelatedViolation, MediaRefs};
use crate::error::Error;
use crate::hub::HubStats;
use crate::supervisor::{TaskStatus, TaskSupervisor};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub supervisor: Arc<TaskSupervisor>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::ServiceDegraded(_) | Error::StoreQuery(_) | Error::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Hours parameter within `1..=max_hours`, `default` when absent
pub(crate) fn checked_hours(
    hours: Option<u32>,
    default: u32,
    max_hours: u32,
) -> std::result::Result<u32, Error> {
    match hours {
        None => Ok(default),
        Some(h) if (1..=max_hours).contains(&h) => Ok(h),
        Some(h) => Err(Error::Config(format!(
            "hours must be between 1 and {}, got {}",
            max_hours, h
        ))),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaUrls {
    pub thumbnail_url: String,
    pub video_url: String,
    pub snapshot_url: String,
}

impl MediaUrls {
    pub fn new(base_url: &str, refs: &MediaRefs) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            thumbnail_url: format!("{}/thumb/{}", base, refs.thumbnail),
            video_url: format!("{}/clip/{}", base, refs.clip),
            snapshot_url: format!("{}/snapshot/{}", base, refs.snapshot),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViolationView {
    #[serde(flatten)]
    pub violation: CorrelatedViolation,
    #[serde(flatten)]
    pub urls: MediaUrls,
}

#[derive(Debug, Serialize)]
struct LiveViolationsResponse {
    violations: Vec<ViolationView>,
    count: usize,
    camera: Option<String>,
    hours: u32,
    freshness: Freshness,
}

#[derive(Debug, Serialize)]
struct HourlyTrendResponse {
    hours: u32,
    buckets: Vec<HourlyBucket>,
    freshness: Freshness,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    degraded: bool,
    #[serde(flatten)]
    report: HealthReport,
    connections: HubStats,
}

#[derive(Debug, Serialize)]
struct TaskActionResponse {
    task: String,
    status: TaskStatus,
}

#[derive(Debug, Serialize)]
struct DeskReloadResponse {
    desks: usize,
}

#[derive(Debug, Deserialize)]
struct LiveQuery {
    camera: Option<String>,
    hours: Option<u32>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TrendQuery {
    hours: Option<u32>,
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        Router::new()
            // Violations
            .route("/api/violations/live", get(get_live_violations))
            .route("/api/violations/hourly-trend", get(get_hourly_trend))
            // System
            .route("/api/system/tasks", get(get_task_status))
            .route("/api/system/tasks/:name/restart", post(restart_task))
            .route("/api/system/health", get(get_health))
            .route("/api/system/desks/reload", post(reload_desks))
            // Live subscribers
            .route("/ws/violations", get(ws_violations))
            .route("/ws/dashboard", get(ws_dashboard))
            .route("/ws/status", get(ws_status))
            .with_state(self.state.clone())
            .layer(cors)
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::Server::from_tcp(listener.into_std()?)?
            .serve(self.router().into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn get_live_violations(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> ApiResult<Json<LiveViolationsResponse>> {
    let ctx = &state.ctx;
    let hours = checked_hours(
        query.hours,
        ctx.config.correlation.live_window_hours,
        ctx.config.api.max_query_hours,
    )?;
    let limit = query.limit.unwrap_or(ctx.config.correlation.live_limit);

    let fetched = ctx.live_violations(query.camera.clone(), hours, limit).await?;
    let base = &ctx.config.media.video_api_base_url;
    let violations: Vec<ViolationView> = fetched
        .value
        .into_iter()
        .map(|violation| ViolationView {
            urls: MediaUrls::new(base, &violation.media_refs),
            violation,
        })
        .collect();

    Ok(Json(LiveViolationsResponse {
        count: violations.len(),
        violations,
        camera: query.camera,
        hours,
        freshness: fetched.freshness,
    }))
}

async fn get_hourly_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<Json<HourlyTrendResponse>> {
    let config = &state.ctx.config;
    let hours = checked_hours(
        query.hours,
        config.correlation.trend_hours,
        config.api.max_query_hours,
    )?;
    let fetched = state.ctx.hourly_trend(hours).await?;

    Ok(Json(HourlyTrendResponse {
        hours,
        buckets: fetched.value,
        freshness: fetched.freshness,
    }))
}

async fn get_task_status(State(state): State<AppState>) -> Json<BTreeMap<String, TaskStatus>> {
    Json(state.supervisor.get_status())
}

async fn restart_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TaskActionResponse>> {
    info!("Restart requested for background task {}", name);
    state.supervisor.restart(&name).await?;

    let status = state
        .supervisor
        .get_status()
        .remove(&name)
        .ok_or_else(|| Error::NotFound(format!("background task {}", name)))?;
    Ok(Json(TaskActionResponse { task: name, status }))
}

async fn get_health(State(state): State<AppState>) -> Response {
    let report = state.ctx.probe_health().await;
    let degraded = state.ctx.is_degraded() || !report.database;
    let code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = HealthResponse {
        status: if report.is_healthy() { "healthy" } else { "degraded" },
        degraded,
        report,
        connections: state.ctx.hub.stats(),
    };
    (code, Json(body)).into_response()
}

async fn reload_desks(State(state): State<AppState>) -> ApiResult<Json<DeskReloadResponse>> {
    let desks = state.ctx.reload_desks()?;
    Ok(Json(DeskReloadResponse { desks }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_urls_follow_the_video_api_layout() {
        let refs = MediaRefs {
            thumbnail: "1700000000.5-abc".into(),
            clip: "1700000000.5-abc".into(),
            snapshot: "reception/1700000000.5-abc".into(),
        };

        let urls = MediaUrls::new("http://video:5001/", &refs);

        assert_eq!(urls.thumbnail_url, "http://video:5001/thumb/1700000000.5-abc");
        assert_eq!(urls.video_url, "http://video:5001/clip/1700000000.5-abc");
        assert_eq!(urls.snapshot_url, "http://video:5001/snapshot/reception/1700000000.5-abc");
    }

    #[test]
    fn error_statuses() {
        let degraded: ApiError = Error::ServiceDegraded("store down".into()).into();
        assert_eq!(degraded.status, 503);
        let missing: ApiError = Error::NotFound("task".into()).into();
        assert_eq!(missing.status, 404);
        let bad: ApiError = Error::Config("hours".into()).into();
        assert_eq!(bad.status, 400);
    }

    #[test]
    fn hours_are_bounded() {
        assert_eq!(checked_hours(None, 24, 168).unwrap(), 24);
        assert_eq!(checked_hours(Some(168), 24, 168).unwrap(), 168);
        assert!(checked_hours(Some(0), 24, 168).is_err());
        assert!(checked_hours(Some(169), 24, 168).is_err());
    }

    #[test]
    fn http_hours_use_the_api_bound() {
        let mut config = crate::config::Config::default();
        config.api.max_query_hours = 720;
        config.websocket.max_hours = 24;

        let api = &config.api;
        let websocket = &config.websocket;
        assert_eq!(checked_hours(Some(500), 24, api.max_query_hours).unwrap(), 500);
        assert!(checked_hours(Some(500), websocket.default_hours, websocket.max_hours).is_err());
    }
}
