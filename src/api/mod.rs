// =====================================================
// HTTP SURFACE
// Admin endpoints that trigger discovery, migration and stored-logic runs
// =====================================================

use crate::db_types::{ConnectionConfig, DatabaseType, ServerConfig, SupabaseConfig, TableDescriptor};
use crate::discovery::{discover_schemas, discover_table_structure, discover_tables, SchemaFilter};
use crate::engine::{self, MigrationEngine};
use crate::error::{ErrorKind, MigrationError};
use crate::orchestrator::{MigrationOptions, MigrationReport, MigrationRunner};
use crate::settings::AppConfig;
use crate::stored_logic::{
    migrate_stored_logic, routine_schema_for, test_stored_logic, SmokeTestReport, StoredLogicReport,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppConfig>,
}

impl AppState {
    pub fn new(settings: AppConfig) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/admin/migration", get(migration_usage).post(run_migration))
        .route(
            "/api/admin/test-discovery",
            get(discovery_usage).post(test_discovery),
        )
        .route(
            "/api/database/:engine/rpc-migration",
            get(rpc_migration_usage).post(rpc_migration),
        )
        .with_state(state)
}

// --- Errors ---

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    kind: Option<ErrorKind>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            kind: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        let status = match err.kind() {
            ErrorKind::Config => StatusCode::BAD_REQUEST,
            ErrorKind::Privilege => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Connection => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
            kind: Some(err.kind()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("Request failed: {}", self.message);
        }
        let body = json!({
            "success": false,
            "error": self.message,
            "errorKind": self.kind,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// --- Full migration ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    pub source_config: ConnectionConfig,
    pub target_config: ConnectionConfig,
    #[serde(default)]
    pub options: MigrationOptions,
}

async fn run_migration(
    State(state): State<AppState>,
    Json(request): Json<MigrationRequest>,
) -> ApiResult<MigrationReport> {
    request.options.validate().map_err(ApiError::bad_request)?;
    request.source_config.validate().map_err(ApiError::bad_request)?;
    request.target_config.validate().map_err(ApiError::bad_request)?;

    let settings = state.settings.as_ref();
    let source = engine::connect(&request.source_config, &settings.timeouts).await?;
    let target = match engine::connect(&request.target_config, &settings.timeouts).await {
        Ok(target) => target,
        Err(err) => {
            source.close().await;
            return Err(err.into());
        }
    };

    let report = MigrationRunner::new(source.as_ref(), target.as_ref(), request.options, settings)
        .with_labels(request.source_config.describe(), request.target_config.describe())
        .with_routine_schema(routine_schema_for(&request.target_config, &settings.stored_logic))
        .run()
        .await;
    Ok(Json(report))
}

async fn migration_usage() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "POST a source and target connection to migrate every tenant schema",
        "method": "POST",
        "body": {
            "sourceConfig": { "type": "mysql", "host": "localhost", "port": 3306, "username": "root", "password": "" },
            "targetConfig": { "type": "supabase", "supabaseUrl": "https://<project>.supabase.co", "supabaseKey": "<service-role key>" },
            "options": {
                "includeSchema": true,
                "includeData": true,
                "overwriteExisting": false,
                "batchSize": 100,
                "includeStoredLogic": false,
                "failurePolicy": "continueOnError"
            }
        }
    }))
}

// --- Discovery probe ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    pub supabase_config: SupabaseConfig,
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResults {
    pub schemas: Vec<String>,
    pub tables: BTreeMap<String, Vec<String>>,
    pub total_tables: usize,
    pub sample_structures: BTreeMap<String, TableDescriptor>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySummary {
    pub schemas_found: usize,
    pub total_tables: usize,
    pub rpc_functions_working: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub success: bool,
    pub message: String,
    pub summary: DiscoverySummary,
    pub results: DiscoveryResults,
}

/// Lists schemas, then tables and one sample structure for the first few schemas.
pub async fn sample_discovery(
    engine: &dyn MigrationEngine,
    settings: &AppConfig,
) -> crate::error::Result<DiscoveryResults> {
    let mut results = DiscoveryResults {
        schemas: discover_schemas(engine, SchemaFilter::Tenant, &settings.discovery.fallback_schemas).await?,
        ..DiscoveryResults::default()
    };

    for schema in results.schemas.iter().take(settings.discovery.sample_schemas) {
        let tables = match discover_tables(engine, schema).await {
            Ok(tables) => tables,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::warn!("Table discovery for {} failed: {}", schema, err);
                Vec::new()
            }
        };
        results.total_tables += tables.len();

        if let Some(first) = tables.first() {
            match discover_table_structure(engine, schema, first).await {
                Ok(descriptor) => {
                    results
                        .sample_structures
                        .insert(format!("{}.{}", schema, first), descriptor);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => log::warn!("Structure of {}.{} unavailable: {}", schema, first, err),
            }
        }
        results.tables.insert(schema.clone(), tables);
    }
    Ok(results)
}

async fn test_discovery(
    State(state): State<AppState>,
    Json(request): Json<DiscoveryRequest>,
) -> ApiResult<DiscoveryResponse> {
    let config = ConnectionConfig::Supabase(request.supabase_config);
    config.validate().map_err(ApiError::bad_request)?;

    let client = engine::connect(&config, &state.settings.timeouts).await?;
    let outcome = sample_discovery(client.as_ref(), &state.settings).await;
    client.close().await;
    let results = outcome?;

    Ok(Json(DiscoveryResponse {
        success: true,
        message: "Discovery test finished".to_string(),
        summary: DiscoverySummary {
            schemas_found: results.schemas.len(),
            total_tables: results.total_tables,
            rpc_functions_working: !results.sample_structures.is_empty(),
        },
        results,
    }))
}

async fn discovery_usage() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "POST { supabaseConfig: { supabaseUrl, supabaseKey } } to test schema discovery",
        "method": "POST"
    }))
}

// --- Stored logic ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RpcMigrationRequest {
    pub config: ServerConfig,
    pub action: String,
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcAction {
    Migrate,
    Test,
}

impl RpcAction {
    fn parse(value: &str) -> Result<Self, ApiError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "migrate" => Ok(Self::Migrate),
            "test" => Ok(Self::Test),
            other => Err(ApiError::bad_request(format!(
                "Unknown action '{}', expected 'migrate' or 'test'",
                other
            ))),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RpcMigrationResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub migration: Option<StoredLogicReport>,
    #[serde(flatten)]
    pub tests: Option<SmokeTestReport>,
}

fn server_connection(engine: &str, config: ServerConfig) -> Result<ConnectionConfig, ApiError> {
    match DatabaseType::from_str(engine).map_err(ApiError::bad_request)? {
        DatabaseType::MySQL => Ok(ConnectionConfig::Mysql(config)),
        DatabaseType::PostgreSQL => Ok(ConnectionConfig::Postgresql(config)),
        DatabaseType::Supabase => Err(ApiError::bad_request(
            "Stored logic on Supabase is managed through the migration endpoint",
        )),
    }
}

async fn rpc_migration(
    Path(engine_name): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RpcMigrationRequest>,
) -> ApiResult<RpcMigrationResponse> {
    let config = server_connection(&engine_name, request.config)?;
    let action = RpcAction::parse(&request.action)?;
    config.validate().map_err(ApiError::bad_request)?;

    let settings = state.settings.as_ref();
    let routine_schema = routine_schema_for(&config, &settings.stored_logic);
    let tenant = request
        .tenant
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| settings.discovery.fallback_schemas.first().cloned());

    let target = engine::connect(&config, &settings.timeouts).await?;
    let response = match action {
        RpcAction::Migrate => {
            let outcome = migrate_stored_logic(target.as_ref(), &routine_schema, &settings.stored_logic).await;
            outcome.map(|report| RpcMigrationResponse {
                success: report.errors.is_empty(),
                message: format!(
                    "{} routine(s) created on {}",
                    report.functions_created, engine_name
                ),
                migration: Some(report),
                tests: None,
            })
        }
        RpcAction::Test => match tenant {
            Some(tenant) => test_stored_logic(target.as_ref(), &routine_schema, &tenant)
                .await
                .map(|report| RpcMigrationResponse {
                    success: report.tests_successful > 0,
                    message: format!(
                        "{}/{} routine test(s) passed for {}",
                        report.tests_successful, report.tests_run, tenant
                    ),
                    migration: None,
                    tests: Some(report),
                }),
            None => Err(MigrationError::Config("tenant is required for action 'test'".to_string())),
        },
    };
    target.close().await;
    Ok(Json(response?))
}

async fn rpc_migration_usage(Path(engine_name): Path<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": format!("POST {{ config, action: 'migrate' | 'test', tenant? }} to manage stored logic on {}", engine_name),
        "method": "POST"
    }))
}
