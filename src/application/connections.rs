//! Connection use cases: permission checks, credential handling, audit logs
//! and applying test outcomes to the stored record.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::adapters::connection_manager::ConnectionManager;
use crate::adapters::health_monitor::uptime_percentage;
use crate::adapters::vault::{self, CredentialVault, VaultError};
use crate::domain::auth::AuthContext;
use crate::domain::permissions::{self, ConnectionAction};
use crate::domain::templates::{self, ConnectionTemplate};
use crate::domain::{
    Connection, ConnectionAlert, ConnectionDraft, ConnectionFilter, ConnectionLog, ConnectionPatch,
    ConnectionStatus, ConnectionTestResult, ConnectionType, CredentialMap, LogLevel,
    NewConnectionLog, Page,
};
use crate::persistence::{CheckOutcome, ConnectionRepository, PersistenceError};

const AUDIT: &str = "conduit::audit";

fn allows(ctx: &AuthContext, action: ConnectionAction, owner_id: &str) -> bool {
    permissions::check(action, &ctx.role(), owner_id, ctx.caller_id())
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Persistence(e) => e.status_code(),
            Self::Vault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

/// A connection as returned to callers: the record plus its credentials,
/// masked unless the caller may view them.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    #[serde(flatten)]
    pub connection: Connection,
    pub credentials: CredentialMap,
    pub credentials_masked: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectionPage {
    pub connections: Vec<ConnectionView>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct LogPage {
    pub logs: Vec<ConnectionLog>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct TemplateCatalog {
    pub templates: Vec<ConnectionTemplate>,
    pub categories: Vec<&'static str>,
    pub providers: Vec<&'static str>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ConnectionStatistics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub error_connections: u64,
    pub recently_used: u64,
    pub average_response_time_ms: f64,
    pub uptime_percentage: f64,
    pub connections_by_type: BTreeMap<&'static str, u64>,
    pub connections_by_status: BTreeMap<&'static str, u64>,
}

/// Per-request overrides of the health-check request used by a test
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestOverrides {
    #[serde(default)]
    pub test_endpoint: Option<String>,
    #[serde(default)]
    pub test_method: Option<String>,
}

impl TestOverrides {
    fn is_empty(&self) -> bool {
        self.test_endpoint.is_none() && self.test_method.is_none()
    }

    fn apply(&self, connection: &mut Connection) {
        if let Some(endpoint) = &self.test_endpoint {
            connection.health_check.endpoint = Some(endpoint.clone());
        }
        if let Some(method) = &self.test_method {
            connection.health_check.method = method.to_uppercase();
        }
    }
}

/// Body of `POST /connections/test`
#[derive(Debug, Clone, Deserialize)]
pub struct UnsavedTest {
    pub connection_data: ConnectionDraft,
    #[serde(flatten)]
    pub overrides: TestOverrides,
}

pub struct ConnectionService {
    repo: Arc<dyn ConnectionRepository>,
    manager: Arc<ConnectionManager>,
    vault: Arc<CredentialVault>,
}

impl ConnectionService {
    pub fn new(
        repo: Arc<dyn ConnectionRepository>,
        manager: Arc<ConnectionManager>,
        vault: Arc<CredentialVault>,
    ) -> Self {
        Self {
            repo,
            manager,
            vault,
        }
    }

    /// Filtered page. Credentials are always masked in listings.
    pub async fn list(
        &self,
        filter: &ConnectionFilter,
        page: Page,
    ) -> Result<ConnectionPage, ServiceError> {
        let (connections, total) = self.repo.list(filter, page).await?;
        let connections = connections
            .into_iter()
            .map(|c| self.masked_view(c))
            .collect();
        Ok(ConnectionPage {
            connections,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    pub async fn get(&self, ctx: &AuthContext, id: &str) -> Result<ConnectionView, ServiceError> {
        let connection = self.load(id).await?;
        Ok(self.view_for(ctx, connection))
    }

    #[tracing::instrument(skip(self, ctx, draft), fields(connection_type = %draft.connection_type, user_id = ctx.caller_id()))]
    pub async fn create(
        &self,
        ctx: &AuthContext,
        mut draft: ConnectionDraft,
    ) -> Result<ConnectionView, ServiceError> {
        if !allows(ctx, ConnectionAction::Create, "") {
            return Err(ServiceError::Forbidden(
                "Insufficient permissions to create connections",
            ));
        }
        validate_name(&draft.name)?;

        let credentials = draft.credentials.take().unwrap_or_default();
        let ciphertext = self.seal(&credentials)?;

        let connection = Connection::from_draft(draft, ctx.caller_id(), ciphertext);
        self.repo.insert(&connection).await?;

        self.repo
            .append_log(
                NewConnectionLog::new(
                    &connection.id,
                    LogLevel::Info,
                    format!("Connection '{}' created", connection.name),
                )
                .with_details(serde_json::json!({ "user_id": ctx.caller_id() }))
                .by(Some(ctx.caller_id())),
            )
            .await?;
        tracing::info!(
            target: AUDIT,
            action = "create",
            connection_id = %connection.id,
            user_id = ctx.caller_id(),
            "connection created"
        );

        Ok(self.view_for(ctx, connection))
    }

    #[tracing::instrument(skip(self, ctx, patch), fields(user_id = ctx.caller_id()))]
    pub async fn update(
        &self,
        ctx: &AuthContext,
        id: &str,
        mut patch: ConnectionPatch,
    ) -> Result<ConnectionView, ServiceError> {
        let mut connection = self.load(id).await?;
        if !allows(ctx, ConnectionAction::Edit, &connection.user_id) {
            return Err(ServiceError::Forbidden(
                "Insufficient permissions to edit this connection",
            ));
        }
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }

        let updated_fields = patch.field_names();
        if let Some(credentials) = patch.credentials.take() {
            connection.credentials = self.seal(&credentials)?;
        }
        patch.apply_to(&mut connection);
        connection.version += 1;
        connection.updated_at = Utc::now();
        connection.updated_by = Some(ctx.caller_id().to_string());

        self.repo.update(&connection).await?;
        self.manager.close_connection(id).await;

        self.repo
            .append_log(
                NewConnectionLog::new(
                    id,
                    LogLevel::Info,
                    format!("Connection '{}' updated", connection.name),
                )
                .with_details(serde_json::json!({
                    "user_id": ctx.caller_id(),
                    "updated_fields": updated_fields,
                }))
                .by(Some(ctx.caller_id())),
            )
            .await?;
        tracing::info!(
            target: AUDIT,
            action = "update",
            connection_id = %id,
            user_id = ctx.caller_id(),
            fields = ?updated_fields,
            "connection updated"
        );

        Ok(self.view_for(ctx, connection))
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = ctx.caller_id()))]
    pub async fn delete(&self, ctx: &AuthContext, id: &str) -> Result<(), ServiceError> {
        let connection = self.load(id).await?;
        if !allows(ctx, ConnectionAction::Delete, &connection.user_id) {
            return Err(ServiceError::Forbidden(
                "Insufficient permissions to delete this connection",
            ));
        }

        self.manager.close_connection(id).await;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::NotFound("Connection"));
        }
        tracing::info!(
            target: AUDIT,
            action = "delete",
            connection_id = %id,
            connection_name = %connection.name,
            user_id = ctx.caller_id(),
            "connection deleted"
        );
        Ok(())
    }

    /// Test a configuration without persisting or caching anything.
    #[tracing::instrument(skip(self, ctx, request), fields(user_id = ctx.caller_id()))]
    pub async fn test_unsaved(
        &self,
        ctx: &AuthContext,
        request: UnsavedTest,
    ) -> Result<ConnectionTestResult, ServiceError> {
        if !allows(ctx, ConnectionAction::Test, "") {
            return Err(ServiceError::Forbidden("Insufficient permissions to test connections"));
        }
        let mut draft = request.connection_data;
        let credentials = draft.credentials.take().unwrap_or_default();
        reject_invalid_credentials(&credentials)?;

        let mut connection = Connection::from_draft(draft, ctx.caller_id(), None);
        request.overrides.apply(&mut connection);

        let result = self.manager.test_unsaved(&connection, credentials).await;
        tracing::info!(
            target: AUDIT,
            action = "test_unsaved",
            connection_type = %connection.connection_type,
            user_id = ctx.caller_id(),
            success = result.success,
            "unsaved connection tested"
        );
        Ok(result)
    }

    /// Test a saved connection and apply the outcome to its record.
    #[tracing::instrument(skip(self, ctx, overrides), fields(user_id = ctx.caller_id()))]
    pub async fn test_saved(
        &self,
        ctx: &AuthContext,
        id: &str,
        overrides: TestOverrides,
    ) -> Result<ConnectionTestResult, ServiceError> {
        if !allows(ctx, ConnectionAction::Test, "") {
            return Err(ServiceError::Forbidden("Insufficient permissions to test connections"));
        }
        let mut connection = self.load(id).await?;

        let started = Instant::now();
        let result = if overrides.is_empty() {
            self.manager.test_connection(&connection).await
        } else {
            let credentials = self.vault.decrypt_stored(connection.credentials.as_deref());
            overrides.apply(&mut connection);
            self.manager.test_unsaved(&connection, credentials).await
        };
        let duration_ms = result
            .response_time_ms
            .unwrap_or_else(|| crate::domain::elapsed_ms(started));

        let checked_at = Utc::now();
        let outcome = if result.success {
            CheckOutcome::success(checked_at)
        } else {
            CheckOutcome::failure(result.failure_reason(), checked_at)
        }
        .manual();
        if self.repo.record_check(id, &outcome).await?.is_none() {
            return Err(ServiceError::NotFound("Connection"));
        }

        let (level, verb) = if result.success {
            (LogLevel::Info, "successful")
        } else {
            (LogLevel::Error, "failed")
        };
        let response_size = result
            .metadata
            .get("response_size")
            .and_then(serde_json::Value::as_u64)
            .and_then(|s| usize::try_from(s).ok());
        self.repo
            .append_log(
                NewConnectionLog::new(
                    id,
                    level,
                    format!("Connection test {}: {}", verb, result.message),
                )
                .with_details(serde_json::json!({
                    "user_id": ctx.caller_id(),
                    "test_result": result,
                }))
                .with_duration(Some(duration_ms))
                .with_response_size(response_size)
                .by(Some(ctx.caller_id())),
            )
            .await?;
        tracing::info!(
            target: AUDIT,
            action = "test",
            connection_id = %id,
            user_id = ctx.caller_id(),
            success = result.success,
            "connection tested"
        );

        Ok(result)
    }

    /// Permission gate for forced health checks. Returns the connection when allowed.
    pub async fn authorize_check(
        &self,
        ctx: &AuthContext,
        id: &str,
    ) -> Result<Connection, ServiceError> {
        if !allows(ctx, ConnectionAction::Test, "") {
            return Err(ServiceError::Forbidden(
                "Insufficient permissions to run health checks",
            ));
        }
        self.load(id).await
    }

    pub async fn logs(
        &self,
        id: &str,
        level: Option<LogLevel>,
        page: Page,
    ) -> Result<LogPage, ServiceError> {
        self.load(id).await?;
        let (logs, total) = self.repo.list_logs(id, level, page).await?;
        Ok(LogPage {
            logs,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    pub async fn alerts(&self, limit: u32) -> Result<Vec<ConnectionAlert>, ServiceError> {
        Ok(self.repo.recent_alerts(limit).await?)
    }

    pub async fn statistics(&self) -> Result<ConnectionStatistics, ServiceError> {
        let by_status = self.repo.count_by_status(false).await?;
        let by_type = self.repo.count_by_type().await?;
        let recently_used = self
            .repo
            .count_connected_since(Utc::now() - chrono::Duration::hours(24))
            .await?;
        let average = self.repo.average_duration_ms().await?.unwrap_or(0.0);

        let mut connections_by_status: BTreeMap<&'static str, u64> =
            ConnectionStatus::all().iter().map(|s| (s.as_str(), 0)).collect();
        for (status, n) in &by_status {
            *connections_by_status.entry(status.as_str()).or_default() += n;
        }
        let mut connections_by_type: BTreeMap<&'static str, u64> =
            ConnectionType::all().iter().map(|t| (t.as_str(), 0)).collect();
        for (connection_type, n) in &by_type {
            *connections_by_type.entry(connection_type.as_str()).or_default() += n;
        }

        let total: u64 = by_status.iter().map(|(_, n)| *n).sum();
        let active = connections_by_status[ConnectionStatus::Active.as_str()];
        let error = connections_by_status[ConnectionStatus::Error.as_str()];

        Ok(ConnectionStatistics {
            total_connections: total,
            active_connections: active,
            error_connections: error,
            recently_used,
            average_response_time_ms: (average * 100.0).round() / 100.0,
            uptime_percentage: uptime_percentage(active, total),
            connections_by_type,
            connections_by_status,
        })
    }

    pub fn templates() -> TemplateCatalog {
        let templates = templates::catalog();
        let categories = templates::distinct(&templates, |t| t.category);
        let providers = templates::distinct(&templates, |t| t.provider);
        TemplateCatalog {
            templates,
            categories,
            providers,
        }
    }

    async fn load(&self, id: &str) -> Result<Connection, ServiceError> {
        self.repo
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound("Connection"))
    }

    /// Validate against the declared auth type, then encrypt. Empty maps store nothing.
    fn seal(&self, credentials: &CredentialMap) -> Result<Option<String>, ServiceError> {
        reject_invalid_credentials(credentials)?;
        if credentials.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.vault.encrypt(credentials)?))
    }

    fn masked_view(&self, connection: Connection) -> ConnectionView {
        let credentials = self.vault.decrypt_stored(connection.credentials.as_deref());
        ConnectionView {
            credentials: self.vault.mask(&credentials),
            credentials_masked: true,
            connection,
        }
    }

    fn view_for(&self, ctx: &AuthContext, connection: Connection) -> ConnectionView {
        if !allows(ctx, ConnectionAction::ViewCredentials, &connection.user_id) {
            return self.masked_view(connection);
        }
        tracing::info!(
            target: AUDIT,
            action = "view_credentials",
            connection_id = %connection.id,
            user_id = ctx.caller_id(),
            "credentials viewed"
        );
        ConnectionView {
            credentials: self.vault.decrypt_stored(connection.credentials.as_deref()),
            credentials_masked: false,
            connection,
        }
    }
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::Validation("Connection name is required".to_string()));
    }
    Ok(())
}

fn reject_invalid_credentials(credentials: &CredentialMap) -> Result<(), ServiceError> {
    let auth_type = vault::auth_type_of(credentials);
    let missing = vault::missing_fields(credentials, auth_type);
    if missing.is_empty() {
        return Ok(());
    }
    Err(ServiceError::Validation(format!(
        "Invalid credentials for authentication type '{}': missing {}",
        auth_type,
        missing.join(", ")
    )))
}
