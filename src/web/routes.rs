use axum::{
    Router,
    routing::{delete, get, post, put},
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Query endpoints
            .route("/nl-query", post(handlers::api::nl_query))
            .route("/query", post(handlers::api::execute_query))
            // Database management
            .route("/databases", get(handlers::api::list_databases))
            .route("/databases/discover", post(handlers::api::discover_databases))
            .route("/databases/external", post(handlers::api::register_external))
            .route("/databases/{name}", delete(handlers::api::remove_external))
            // Schema and context
            .route("/schema", get(handlers::api::get_schema))
            .route("/schema/refresh", post(handlers::api::refresh_schema))
            .route(
                "/context",
                put(handlers::api::set_context).delete(handlers::api::clear_context),
            )
            // Change feed and router vocabulary
            .route(
                "/changes",
                get(handlers::api::list_changes).post(handlers::api::record_change),
            )
            .route("/keywords", get(handlers::api::list_keywords))
            .route("/keywords/{database}", post(handlers::api::add_keywords))
            // System status
            .route("/rate-limit/reset", post(handlers::api::reset_rate_limit))
            .route("/status", get(handlers::api::system_status)),
    )
}
