//! REST handlers for `/connections`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::connection_manager::ConnectionManager;
use crate::adapters::health_monitor::HealthMonitor;
use crate::application::{ConnectionService, ServiceError, TestOverrides, UnsavedTest};
use crate::domain::auth::AuthContext;
use crate::domain::{ConnectionDraft, ConnectionFilter, ConnectionPatch, LogLevel, Page};

const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_LOG_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_ALERT_LIMIT: u32 = 50;
const MAX_ALERT_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct ConnectionsState {
    pub service: Arc<ConnectionService>,
    pub monitor: Arc<HealthMonitor>,
    pub manager: Arc<ConnectionManager>,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
    pub status: Option<String>,
    pub provider: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    fn filter(&self) -> Result<ConnectionFilter, ServiceError> {
        let connection_type = self
            .connection_type
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .transpose()
            .map_err(ServiceError::Validation)?;
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .transpose()
            .map_err(ServiceError::Validation)?;
        Ok(ConnectionFilter {
            connection_type,
            status,
            provider: self.provider.clone().filter(|s| !s.is_empty()),
            search: self.search.clone().filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub level: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub limit: Option<u32>,
}

/// No auth layer means the local administrator.
fn principal(caller: Option<Extension<AuthContext>>) -> AuthContext {
    caller
        .map(|Extension(ctx)| ctx)
        .unwrap_or_else(AuthContext::local_admin)
}

fn ok<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn router(state: ConnectionsState) -> Router {
    Router::new()
        .route("/connections", get(list_connections).post(create_connection))
        .route("/connections/test", post(test_unsaved_connection))
        .route("/connections/templates", get(list_templates))
        .route("/connections/statistics", get(connection_statistics))
        .route("/connections/health-summary", get(health_summary))
        .route("/connections/health-alerts", get(health_alerts))
        .route("/connections/active", get(active_connections))
        .route(
            "/connections/:id",
            get(get_connection)
                .put(update_connection)
                .delete(delete_connection),
        )
        .route("/connections/:id/test", post(test_saved_connection))
        .route("/connections/:id/logs", get(connection_logs))
        .route("/connections/:id/health-check", post(force_health_check))
        .with_state(state)
}

pub async fn list_connections(
    State(state): State<ConnectionsState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = query.filter()?;
    let page = Page::new(query.page, query.limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    Ok(ok(state.service.list(&filter, page).await?))
}

pub async fn get_connection(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    Ok(ok(state.service.get(&ctx, &id).await?))
}

pub async fn create_connection(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Json(draft): Json<ConnectionDraft>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    let view = state.service.create(&ctx, draft).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

pub async fn update_connection(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Json(patch): Json<ConnectionPatch>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    Ok(ok(state.service.update(&ctx, &id, patch).await?))
}

pub async fn delete_connection(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    state.service.delete(&ctx, &id).await?;
    Ok(ok(serde_json::json!({
        "message": "Connection deleted",
        "connection_id": id,
    })))
}

pub async fn test_unsaved_connection(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Json(request): Json<UnsavedTest>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    Ok(ok(state.service.test_unsaved(&ctx, request).await?))
}

/// Overrides may come from the query string or an optional JSON body; the body wins.
pub async fn test_saved_connection(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Query(query): Query<TestOverrides>,
    body: Option<Json<TestOverrides>>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let overrides = TestOverrides {
        test_endpoint: body.test_endpoint.or(query.test_endpoint),
        test_method: body.test_method.or(query.test_method),
    };
    Ok(ok(state.service.test_saved(&ctx, &id, overrides).await?))
}

pub async fn list_templates() -> impl IntoResponse {
    ok(ConnectionService::templates())
}

pub async fn connection_statistics(
    State(state): State<ConnectionsState>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(ok(state.service.statistics().await?))
}

pub async fn connection_logs(
    State(state): State<ConnectionsState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let level: Option<LogLevel> = query
        .level
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .transpose()
        .map_err(ServiceError::Validation)?;
    let page = Page::new(query.page, query.limit, DEFAULT_LOG_PAGE_SIZE, MAX_PAGE_SIZE);
    Ok(ok(state.service.logs(&id, level, page).await?))
}

pub async fn force_health_check(
    State(state): State<ConnectionsState>,
    caller: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let ctx = principal(caller);
    state.service.authorize_check(&ctx, &id).await?;
    let result = state
        .monitor
        .force_health_check(&id)
        .await?
        .ok_or(ServiceError::NotFound("Connection"))?;
    Ok(ok(serde_json::json!({
        "message": "Health check completed",
        "connection_id": id,
        "result": result,
    })))
}

pub async fn health_summary(
    State(state): State<ConnectionsState>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(ok(state.monitor.health_summary().await?))
}

pub async fn health_alerts(
    State(state): State<ConnectionsState>,
    Query(query): Query<AlertQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);
    let alerts = state.service.alerts(limit).await?;
    Ok(ok(serde_json::json!({
        "total": alerts.len(),
        "alerts": alerts,
        "limit": limit,
    })))
}

/// Providers warm in this process. Can disagree with stored status.
pub async fn active_connections(State(state): State<ConnectionsState>) -> impl IntoResponse {
    let active = state.manager.active_connections().await;
    ok(serde_json::json!({
        "total": active.len(),
        "connections": active,
    }))
}
