//! The question-answering agent.
//!
//! [`SqlAgent`] owns per-session state (database/table context, schema
//! snapshot, sticky rate-limit flag). Every call that can touch that state
//! takes `&mut self`, so one instance never runs two questions at once;
//! shared owners serialise access behind a mutex.

pub mod context;
pub mod controller;
pub mod models;

use crate::config::AppConfig;
use crate::db::backend::{Backends, format_cell};
use crate::db::duckdb_backend::DuckDbBackend;
use crate::db::executor::{ExecutionResult, QueryExecutor};
use crate::db::registry::{DatabaseRegistry, DatabaseTarget};
use crate::db::schema::{SchemaDescriber, SchemaDescription, render_combined};
use crate::error::{AgentError, AgentResult};
use crate::llm::explainer::ExplanationRequest;
use crate::llm::{
    ErrorContext, Explanation, ExplanationGenerator, Generation, GenerationRequest, LanguageModel,
    QueryGenerator,
};
use crate::router::{Catalog, DatabaseRouter, KeywordEntry, KeywordRouter, KeywordTable};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use context::{DatabaseContext, ScopedContext, Session};
pub use controller::{ControllerOutcome, QuerySteps, RetryController};
pub use models::{QueryAttempt, QueryResponse};

/// Components a question flows through. Held apart from [`Session`] so a
/// scoped borrow of the session can coexist with shared access to these.
struct Pipeline {
    registry: DatabaseRegistry,
    backends: Arc<Backends>,
    describer: SchemaDescriber,
    executor: QueryExecutor,
    generator: QueryGenerator,
    explainer: ExplanationGenerator,
    router: Arc<dyn DatabaseRouter>,
    controller: RetryController,
    auto_table_filter: bool,
}

pub struct SqlAgent {
    pipeline: Pipeline,
    session: Session,
}

impl SqlAgent {
    /// Agent over the local DuckDB store described by `config`.
    pub async fn new(config: &AppConfig, model: Arc<dyn LanguageModel>) -> AgentResult<Self> {
        let backends = Backends::new(Arc::new(DuckDbBackend::new()));
        Self::with_backends(config, model, backends).await
    }

    /// Agent with additional backends, for example for external dialects.
    pub async fn with_backends(
        config: &AppConfig,
        model: Arc<dyn LanguageModel>,
        backends: Backends,
    ) -> AgentResult<Self> {
        let backends = Arc::new(backends);
        let registry = DatabaseRegistry::open(
            &config.data_dir,
            config.database.primary.clone(),
            Arc::clone(backends.local()),
        )?;
        info!(
            "Opened database registry with {} database(s)",
            registry.list().len()
        );

        let table = KeywordTable::load(config.keyword_file());
        let router = KeywordRouter::with_seeds(
            table,
            config.router.max_keywords,
            &config.router.keywords,
        );

        let describer = SchemaDescriber::new(Arc::clone(&backends), config.database.sample_rows);
        let primary = registry.primary()?;
        let schema = describer.describe(&primary, None).await;

        let pipeline = Pipeline {
            registry,
            executor: QueryExecutor::new(Arc::clone(&backends)),
            backends,
            describer,
            generator: QueryGenerator::new(Arc::clone(&model), config.agent.table_hints.clone()),
            explainer: ExplanationGenerator::new(model, config.agent.preview_rows),
            router: Arc::new(router),
            controller: RetryController::new(
                config.agent.max_retries,
                config.agent.transition_limit,
            ),
            auto_table_filter: config.router.auto_table_filter,
        };

        Ok(Self {
            pipeline,
            session: Session::new(schema),
        })
    }

    /// Answer `question`, picking databases and tables automatically unless
    /// a context was set explicitly.
    pub async fn query(&mut self, question: &str) -> QueryResponse {
        self.query_with(question, None, None).await
    }

    /// Answer `question` against an explicit selection. `None` or an empty
    /// selection falls back to the session context, then to detection.
    ///
    /// Never fails: every fault ends up in a failure-shaped response. The
    /// session context and schema snapshot are the same afterwards as before.
    pub async fn query_with(
        &mut self,
        question: &str,
        databases: Option<&[String]>,
        tables: Option<&[String]>,
    ) -> QueryResponse {
        info!("Processing question: {}", question);
        let mut scope = ScopedContext::enter(&mut self.session);

        let answer = self.pipeline.answer(question, databases, tables, &mut scope);
        let outcome = AssertUnwindSafe(answer).catch_unwind().await;
        let rate_limited = scope.rate_limited;
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(error = %e, "Query pipeline failed");
                QueryResponse::internal_error(question, e, rate_limited)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Query pipeline panicked: {}", message);
                QueryResponse::internal_error(question, AgentError::Internal(message), rate_limited)
            }
        }
    }

    /// Re-read the schema of the current database with the current table
    /// filter. Call after anything changes table structure.
    pub async fn refresh_schema(&mut self) {
        let database = match self.session.context.databases.as_slice() {
            [single] => single.clone(),
            _ => self.pipeline.registry.primary_name().to_string(),
        };
        let filter = table_filter(&self.session.context.tables);

        self.session.schema = match self.pipeline.registry.resolve(&database) {
            Ok(target) => self.pipeline.describer.describe(&target, filter).await,
            Err(e) => SchemaDescription::failed(database, e.to_string()),
        };
        debug!("Refreshed schema for {}", self.session.schema.database);
    }

    /// Rescan storage, bring the router's vocabulary up to date and refresh
    /// the schema snapshot.
    pub async fn refresh_all(&mut self) -> AgentResult<()> {
        self.pipeline.registry.refresh()?;

        let known = self.pipeline.registry.list();
        self.session
            .context
            .databases
            .retain(|name| known.contains_key(name));

        self.remap().await;
        self.refresh_schema().await;
        Ok(())
    }

    /// Pin the databases used by following questions. Unknown names are
    /// dropped; when none is left the primary database is used. A single
    /// valid name also switches the schema snapshot to that database.
    pub async fn set_database_context(&mut self, names: &[String]) {
        let valid: Vec<String> = names
            .iter()
            .filter(|name| self.pipeline.registry.contains(name))
            .cloned()
            .collect();

        if valid.is_empty() {
            warn!(?names, "No known database in context request, using primary");
            self.session.context.databases =
                vec![self.pipeline.registry.primary_name().to_string()];
            return;
        }

        let switch = valid.len() == 1;
        self.session.context.databases = valid;
        if switch {
            self.refresh_schema().await;
        }
    }

    /// Pin the tables used by following questions.
    pub fn set_table_context(&mut self, names: &[String]) {
        self.session.context.tables = names.to_vec();
    }

    /// Back to automatic selection on the primary database.
    pub async fn clear_context(&mut self) {
        self.session.context = DatabaseContext::default();
        self.refresh_schema().await;
    }

    pub fn context(&self) -> &DatabaseContext {
        &self.session.context
    }

    pub fn schema_snapshot(&self) -> &SchemaDescription {
        &self.session.schema
    }

    pub fn is_rate_limited(&self) -> bool {
        self.session.rate_limited
    }

    pub fn reset_rate_limit(&mut self) {
        info!("Rate limit flag reset");
        self.session.rate_limited = false;
    }

    pub async fn detect_databases(&self, question: &str) -> BTreeSet<String> {
        let catalog = self.pipeline.catalog();
        self.pipeline.router.detect_databases(question, &catalog).await
    }

    /// Tables of the current schema snapshot the question mentions.
    pub fn detect_tables(&self, question: &str) -> Option<BTreeSet<String>> {
        self.pipeline
            .router
            .detect_tables(question, &self.session.schema.table_names())
    }

    pub fn set_router(&mut self, router: Arc<dyn DatabaseRouter>) {
        self.pipeline.router = router;
    }

    pub fn router(&self) -> &Arc<dyn DatabaseRouter> {
        &self.pipeline.router
    }

    pub async fn remap(&self) -> usize {
        let catalog = self.pipeline.catalog();
        self.pipeline.router.remap(&catalog).await
    }

    pub async fn add_keywords(&self, database: &str, keywords: &[String]) -> usize {
        self.pipeline.router.add_keywords(database, keywords).await
    }

    pub async fn keywords(&self) -> BTreeMap<String, KeywordEntry> {
        self.pipeline.router.keywords().await
    }

    /// Run hand-written SQL against a named database.
    pub async fn execute_on(&self, database: &str, sql: &str) -> ExecutionResult {
        match self.pipeline.registry.resolve(database) {
            Ok(target) => self.pipeline.executor.execute(&target, sql).await,
            Err(e) => ExecutionResult::failure(e.to_string()),
        }
    }

    /// Describe any registered database without touching the session.
    pub async fn describe(&self, database: &str, tables: Option<&[String]>) -> SchemaDescription {
        match self.pipeline.registry.resolve(database) {
            Ok(target) => self.pipeline.describer.describe(&target, tables).await,
            Err(e) => SchemaDescription::failed(database, e.to_string()),
        }
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.pipeline.registry
    }

    pub fn registry_mut(&mut self) -> &mut DatabaseRegistry {
        &mut self.pipeline.registry
    }

    pub fn databases(&self) -> Vec<String> {
        self.pipeline.registry.names()
    }

    pub fn set_model(&mut self, model: Arc<dyn LanguageModel>) {
        self.pipeline.generator.set_model(Arc::clone(&model));
        self.pipeline.explainer.set_model(model);
    }
}

impl Pipeline {
    fn catalog(&self) -> Catalog<'_> {
        Catalog {
            databases: self.registry.list(),
            primary: self.registry.primary_name(),
            describer: &self.describer,
        }
    }

    async fn answer(
        &self,
        question: &str,
        databases: Option<&[String]>,
        tables: Option<&[String]>,
        session: &mut Session,
    ) -> AgentResult<QueryResponse> {
        let selected = self.select_databases(question, databases, session).await;
        session.context.databases = selected.clone();
        let considered = selected.clone();

        let primary_name = self.registry.primary_name().to_string();
        let first = selected.first().cloned().unwrap_or(primary_name);
        let target = self.registry.resolve(&first)?;

        if session.rate_limited {
            info!("Rate limited, answering without the language model");
            let mut response = self.rate_limited_response(question, &target).await;
            response.databases_considered = considered;
            return Ok(response);
        }

        // Table scope: explicit argument, then session context, then detection
        let mut tables: Vec<String> = match tables {
            Some(tables) if !tables.is_empty() => tables.to_vec(),
            _ => session.context.tables.clone(),
        };

        let schema_text = if selected.len() > 1 {
            let mut descriptions = Vec::with_capacity(selected.len());
            for name in &selected {
                let target = self.registry.resolve(name)?;
                descriptions.push(self.describer.describe(&target, table_filter(&tables)).await);
            }
            session.schema = descriptions
                .first()
                .cloned()
                .unwrap_or_else(|| SchemaDescription::failed(first.clone(), "not described"));
            render_combined(&descriptions)
        } else {
            let mut description = self.describer.describe(&target, table_filter(&tables)).await;
            if tables.is_empty() && self.auto_table_filter {
                if let Some(found) = self
                    .router
                    .detect_tables(question, &description.table_names())
                {
                    tables = found.into_iter().collect();
                    description = self.describer.describe(&target, Some(&tables)).await;
                }
            }
            session.schema = description;
            session.schema.render()
        };
        session.context.tables = tables.clone();

        let prompt_question = if selected.len() > 1 {
            let mut scoped = format!("Available databases: {}. ", selected.join(", "));
            if !tables.is_empty() {
                scoped.push_str(&format!("Focus on these tables: {}. ", tables.join(", ")));
            }
            scoped.push_str(question);
            scoped
        } else {
            question.to_string()
        };

        let (dialect, fallback_sql) = self.dialect_of(&target);
        let steps = AgentSteps {
            pipeline: self,
            target: &target,
            question: &prompt_question,
            original_question: question,
            schema: &schema_text,
            dialect,
            fallback_sql,
        };

        let outcome = self.controller.run(&steps, question).await?;
        if outcome.rate_limited && !session.rate_limited {
            warn!("Language model rate limit reached, further questions use the fallback");
            session.rate_limited = true;
        }

        let mut explanation = outcome.explanation.into_text();
        if selected.len() > 1 {
            explanation.push_str(&format!(
                "\n\nNote: This query was executed against the '{}' database only. Cross-database execution across ({}) is not implemented; use explicit ATTACH statements in custom SQL to combine them.",
                first,
                selected.join(", ")
            ));
        }

        Ok(QueryResponse {
            question: question.to_string(),
            sql_query: outcome.attempt.sql,
            success: outcome.result.success(),
            query_result: outcome.result,
            explanation,
            rate_limited: outcome.rate_limited,
            database_used: Some(first),
            databases_considered: considered,
        })
    }

    /// Selection order: explicit argument, session context, router. Explicit
    /// and context selections keep the caller's order; router output is in
    /// name order. Duplicates and names the registry does not know are
    /// dropped; the primary fills an empty set.
    async fn select_databases(
        &self,
        question: &str,
        databases: Option<&[String]>,
        session: &Session,
    ) -> Vec<String> {
        let requested: Vec<String> = match databases {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ if !session.context.databases.is_empty() => session.context.databases.clone(),
            _ => {
                let catalog = self.catalog();
                self.router
                    .detect_databases(question, &catalog)
                    .await
                    .into_iter()
                    .collect()
            }
        };

        let mut seen = BTreeSet::new();
        let mut selected: Vec<String> = requested
            .into_iter()
            .filter(|name| self.registry.contains(name) && seen.insert(name.clone()))
            .collect();
        if selected.is_empty() {
            selected.push(self.registry.primary_name().to_string());
        }

        debug!(?selected, "Selected databases");
        selected
    }

    fn dialect_of(&self, target: &DatabaseTarget) -> (&'static str, &'static str) {
        let backend = self
            .backends
            .for_target(target)
            .unwrap_or_else(|_| Arc::clone(self.backends.local()));
        (backend.dialect(), backend.list_tables_sql())
    }

    async fn rate_limited_response(&self, question: &str, target: &DatabaseTarget) -> QueryResponse {
        let (_, sql) = self.dialect_of(target);
        let result = self.executor.execute(target, sql).await;

        let tables = match &result {
            ExecutionResult::Select { rows, .. } => rows
                .iter()
                .filter_map(|row| row.first())
                .map(format_cell)
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        };

        QueryResponse {
            question: question.to_string(),
            sql_query: sql.to_string(),
            success: result.success(),
            query_result: result,
            explanation: format!(
                "AI is temporarily at capacity. Here are the available tables: {}",
                tables
            ),
            rate_limited: true,
            database_used: Some(target.name.clone()),
            databases_considered: Vec::new(),
        }
    }
}

/// Binds the pipeline to one question and one database.
struct AgentSteps<'a> {
    pipeline: &'a Pipeline,
    target: &'a DatabaseTarget,
    question: &'a str,
    original_question: &'a str,
    schema: &'a str,
    dialect: &'static str,
    fallback_sql: &'static str,
}

#[async_trait]
impl QuerySteps for AgentSteps<'_> {
    async fn generate(&self, error_context: Option<ErrorContext>) -> Generation {
        let request = GenerationRequest {
            question: self.question,
            schema: self.schema,
            dialect: self.dialect,
            fallback_sql: self.fallback_sql,
            error_context,
        };
        self.pipeline.generator.generate(&request).await
    }

    async fn execute(&self, sql: &str) -> ExecutionResult {
        self.pipeline.executor.execute(self.target, sql).await
    }

    async fn explain(&self, sql: &str, result: &ExecutionResult, rate_limited: bool) -> Explanation {
        let request = ExplanationRequest {
            question: self.original_question,
            sql,
            result,
            schema: self.schema,
        };
        self.pipeline.explainer.explain(&request, rate_limited).await
    }
}

fn table_filter(tables: &[String]) -> Option<&[String]> {
    if tables.is_empty() { None } else { Some(tables) }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic".to_string()
    }
}
