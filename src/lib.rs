use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod discord_client;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod storage;
pub mod trello_client;

use config::AuthMode;
use mcp::server::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub auth_mode: Arc<AuthMode>,
    pub cors_origin: HeaderValue,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(auth_mode: AuthMode, cors_origin: HeaderValue, dispatcher: Dispatcher) -> Self {
        Self {
            auth_mode: Arc::new(auth_mode),
            cors_origin,
            dispatcher: Arc::new(dispatcher),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", post(http::handlers::rpc_endpoint))
        .route("/mcp", post(http::handlers::rpc_endpoint))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .merge(protected)
        .fallback(http::handlers::not_found)
        .method_not_allowed_fallback(http::handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http::cors::cors_middleware,
        ))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
