use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::agent::{DatabaseContext, QueryResponse};
use crate::changes::{ChangeOperation, ChangeRecord};
use crate::db::executor::ExecutionResult;
use crate::db::registry::{DatabaseTarget, Dialect};
use crate::db::schema::SchemaDescription;
use crate::db::statement::{StatementKind, classify};
use crate::error::DbError;
use crate::router::KeywordEntry;
use crate::web::state::AppState;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// Query types

#[derive(Debug, Deserialize, Clone)]
pub struct NlQueryRequest {
    pub question: String,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: String,
    pub database: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteQueryResponse {
    pub database: String,
    pub result: ExecutionResult,
    pub success: bool,
    pub execution_time_ms: u64,
}

// Database types

#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub locator: String,
    pub primary: bool,
}

impl DatabaseInfo {
    fn from_target(target: &DatabaseTarget, primary: &str) -> Self {
        Self {
            name: target.name.clone(),
            kind: target.type_tag().to_string(),
            locator: target.display_locator(),
            primary: target.name == primary,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterExternalRequest {
    pub name: String,
    pub dialect: String,
    pub connection_string: String,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub added: Vec<String>,
    pub databases: Vec<String>,
}

// Schema and context types

#[derive(Debug, Deserialize)]
pub struct SchemaParams {
    pub database: Option<String>,
    /// Comma separated table names.
    pub tables: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub schema: SchemaDescription,
    pub text: String,
}

impl From<SchemaDescription> for SchemaResponse {
    fn from(schema: SchemaDescription) -> Self {
        let text = schema.render();
        Self { schema, text }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

// Change feed and keyword types

#[derive(Debug, Deserialize)]
pub struct ChangeParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRequest {
    pub operation: ChangeOperation,
    pub database: String,
    pub table: Option<String>,
    #[serde(default)]
    pub detail: Value,
}

#[derive(Debug, Deserialize)]
pub struct KeywordsRequest {
    pub keywords: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct KeywordsResponse {
    pub database: String,
    pub added: usize,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub database_count: usize,
    pub primary_database: String,
    pub llm_backend: String,
    pub rate_limited: bool,
    pub recorded_changes: usize,
    pub context: DatabaseContext,
}

fn db_error(e: DbError) -> (StatusCode, String) {
    let status = match &e {
        DbError::NotFound { .. } => StatusCode::NOT_FOUND,
        DbError::NameConflict { .. } => StatusCode::CONFLICT,
        DbError::InvalidName { .. } | DbError::UnsupportedDialect { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// API Implementations

pub async fn nl_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NlQueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question cannot be empty".to_string()));
    }

    let mut agent = state.agent.lock().await;
    state.apply_pending_changes(&mut agent).await;

    let databases = (!request.databases.is_empty()).then_some(request.databases.as_slice());
    let tables = (!request.tables.is_empty()).then_some(request.tables.as_slice());
    let response = agent.query_with(question, databases, tables).await;

    info!(
        success = response.success,
        rate_limited = response.rate_limited,
        "Answered natural language query"
    );
    Ok(Json(response))
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteQueryRequest>,
) -> ApiResult<Json<ExecuteQueryResponse>> {
    let agent = state.agent.lock().await;
    let database = request
        .database
        .unwrap_or_else(|| agent.registry().primary_name().to_string());
    debug!("Executing custom query on {}: {}", database, request.query);

    let start = Instant::now();
    let result = agent.execute_on(&database, &request.query).await;
    let execution_time_ms = start.elapsed().as_millis() as u64;

    if result.success() && classify(&request.query) == StatementKind::Write {
        state.changes.record(
            ChangeOperation::CustomQuery,
            database.clone(),
            None,
            serde_json::json!({ "query": request.query }),
        );
    }

    Ok(Json(ExecuteQueryResponse {
        database,
        success: result.success(),
        result,
        execution_time_ms,
    }))
}

pub async fn list_databases(State(state): State<Arc<AppState>>) -> Json<Vec<DatabaseInfo>> {
    let agent = state.agent.lock().await;
    let registry = agent.registry();
    let primary = registry.primary_name();

    Json(
        registry
            .list()
            .values()
            .map(|target| DatabaseInfo::from_target(target, primary))
            .collect(),
    )
}

pub async fn discover_databases(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DiscoverResponse>> {
    let mut agent = state.agent.lock().await;
    let before: BTreeSet<String> = agent.databases().into_iter().collect();

    agent.registry_mut().discover().map_err(db_error)?;

    let databases = agent.databases();
    let added: Vec<String> = databases
        .iter()
        .filter(|name| !before.contains(*name))
        .cloned()
        .collect();
    for name in &added {
        state
            .changes
            .record(ChangeOperation::CreateDatabase, name.clone(), None, Value::Null);
    }

    Ok(Json(DiscoverResponse { added, databases }))
}

pub async fn register_external(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterExternalRequest>,
) -> ApiResult<(StatusCode, Json<DatabaseInfo>)> {
    let dialect: Dialect = request
        .dialect
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;

    let mut agent = state.agent.lock().await;
    let target = agent
        .registry_mut()
        .register_external(&request.name, dialect, &request.connection_string)
        .map_err(db_error)?;

    state.changes.record(
        ChangeOperation::CreateDatabase,
        target.name.clone(),
        None,
        serde_json::json!({ "type": dialect }),
    );

    let info = DatabaseInfo::from_target(&target, agent.registry().primary_name());
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn remove_external(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let mut agent = state.agent.lock().await;
    agent.registry_mut().remove_external(&name).map_err(db_error)?;

    state
        .changes
        .record(ChangeOperation::DeleteDatabase, name, None, Value::Null);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SchemaParams>,
) -> Json<SchemaResponse> {
    let agent = state.agent.lock().await;

    let tables: Option<Vec<String>> = params.tables.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    });

    let description = match params.database {
        Some(database) => agent.describe(&database, tables.as_deref()).await,
        None if tables.is_none() => agent.schema_snapshot().clone(),
        None => {
            let primary = agent.registry().primary_name().to_string();
            agent.describe(&primary, tables.as_deref()).await
        }
    };

    Json(description.into())
}

pub async fn refresh_schema(State(state): State<Arc<AppState>>) -> ApiResult<Json<SchemaResponse>> {
    let mut agent = state.agent.lock().await;
    state.apply_pending_changes(&mut agent).await;
    agent.refresh_all().await.map_err(|e| {
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(agent.schema_snapshot().clone().into()))
}

pub async fn set_context(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContextRequest>,
) -> Json<DatabaseContext> {
    let mut agent = state.agent.lock().await;
    if !request.databases.is_empty() {
        agent.set_database_context(&request.databases).await;
    }
    agent.set_table_context(&request.tables);
    Json(agent.context().clone())
}

pub async fn clear_context(State(state): State<Arc<AppState>>) -> Json<DatabaseContext> {
    let mut agent = state.agent.lock().await;
    agent.clear_context().await;
    Json(agent.context().clone())
}

pub async fn list_changes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChangeParams>,
) -> Json<Vec<ChangeRecord>> {
    Json(state.changes.recent(params.limit.unwrap_or(100)))
}

pub async fn record_change(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChangeRequest>,
) -> (StatusCode, Json<ChangeRecord>) {
    let record = state.changes.record(
        request.operation,
        request.database,
        request.table,
        request.detail,
    );
    (StatusCode::CREATED, Json(record))
}

pub async fn list_keywords(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, KeywordEntry>> {
    let agent = state.agent.lock().await;
    Json(agent.keywords().await)
}

pub async fn add_keywords(
    State(state): State<Arc<AppState>>,
    Path(database): Path<String>,
    Json(request): Json<KeywordsRequest>,
) -> ApiResult<Json<KeywordsResponse>> {
    let agent = state.agent.lock().await;
    if !agent.registry().contains(&database) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Database '{}' not found", database),
        ));
    }

    let added = agent.add_keywords(&database, &request.keywords).await;
    Ok(Json(KeywordsResponse { database, added }))
}

pub async fn reset_rate_limit(State(state): State<Arc<AppState>>) -> StatusCode {
    state.agent.lock().await.reset_rate_limit();
    StatusCode::NO_CONTENT
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let agent = state.agent.lock().await;
    let uptime = chrono::Utc::now() - state.startup_time;

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds(),
        database_count: agent.registry().list().len(),
        primary_database: agent.registry().primary_name().to_string(),
        llm_backend: state.config.llm.backend.clone(),
        rate_limited: agent.is_rate_limited(),
        recorded_changes: state.changes.len(),
        context: agent.context().clone(),
    })
}
