//! HTTP surface: shared state and route table.
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth;
use crate::config::Config;
use crate::db::Pool;
use crate::handlers;
use crate::queue::{Gateways, JobQueue};

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub queue: JobQueue,
    pub gateways: Arc<dyn Gateways>,
    pub config: Arc<Config>,
}

/// Routes are mounted under `/api`; everything except login and health
/// requires a session token.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let protected = Router::new()
        .route("/settings", get(handlers::get_settings).post(handlers::save_settings))
        .route("/connect", post(handlers::connect))
        .route("/wp/check-polylang", post(handlers::check_polylang))
        .route("/wp/install-polylang", post(handlers::install_polylang))
        .route("/posts", get(handlers::list_posts))
        .route("/translate", post(handlers::translate))
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/{job_id}/logs", get(handlers::job_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let api = Router::new()
        .route("/login", post(handlers::login))
        .route("/health", get(handlers::health))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
