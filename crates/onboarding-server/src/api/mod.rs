//! HTTP surfaces for registration: a handle-addressed JSON API and a session-addressed web flow.

mod handlers;
mod middleware;
mod session_store;
mod types;
mod web;

pub use middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
pub use session_store::{SessionFlowStore, FLOW_KEY};
pub use types::*;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use onboarding_core::{FlowRepository, FlowStateMachine};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tower_sessions::{MemoryStore, SessionManagerLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Handle-addressed flows
    pub repository: FlowRepository,
    pub machine: Arc<FlowStateMachine>,
    /// Mark the session cookie `Secure`
    pub secure_cookie: bool,
}

impl AppState {
    pub fn new(repository: FlowRepository, machine: FlowStateMachine, secure_cookie: bool) -> Self {
        Self {
            repository,
            machine: Arc::new(machine),
            secure_cookie,
        }
    }
}

/// Create the router with the default rate limit.
pub fn create_router(state: AppState) -> Router {
    create_router_with_rate_limit(state, RateLimitState::new(60))
}

pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.secure_cookie);

    let web = Router::new()
        .route("/", get(web::status))
        .route("/start", post(web::start))
        .route("/profile", post(web::submit_profile))
        .route("/verify_phone", post(web::verify_phone))
        .route("/resend_code", post(web::resend_code))
        .route("/set_pin", post(web::set_pin))
        .route("/confirm_pin", post(web::confirm_pin))
        .layer(sessions);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/registrations", post(handlers::start_registration))
        .route("/v1/registrations/:handle", get(handlers::get_status))
        .route("/v1/registrations/profile", post(handlers::submit_profile))
        .route("/v1/registrations/verify_phone", post(handlers::verify_phone))
        .route("/v1/registrations/resend_code", post(handlers::resend_code))
        .route("/v1/registrations/set_pin", post(handlers::set_pin))
        .route("/v1/registrations/confirm_pin", post(handlers::confirm_pin))
        .nest("/web/registration", web)
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
