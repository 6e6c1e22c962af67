pub mod auth;
pub mod health;
pub mod workflow;

use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::{
    auth::require_bearer_auth,
    cors::cors_layer,
    rate_limit::{per_ip_middleware, RateLimiter},
};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let config = state.config.clone();
    let limiter = RateLimiter::new(
        config.auth_rate_limit,
        Duration::from_secs(config.auth_rate_window_secs),
    );

    let auth_api = Router::new()
        .route("/api/auth/sign-up", post(auth::sign_up))
        .route("/api/auth/sign-in", post(auth::sign_in))
        .layer(from_fn_with_state(limiter, per_ip_middleware));

    let workflow_api = Router::new()
        .route(
            "/api/workflows/onboarding",
            post(workflow::trigger_onboarding),
        )
        .route(
            "/api/workflows/onboarding/:email",
            get(workflow::get_onboarding_status).delete(workflow::cancel_onboarding),
        );

    let account_api = Router::new()
        .route("/api/onboarding/unsubscribe", post(workflow::unsubscribe))
        .layer(from_fn_with_state(state.clone(), require_bearer_auth));

    Router::new()
        .route("/health", get(health::health))
        .merge(auth_api)
        .merge(workflow_api)
        .merge(account_api)
        .with_state(state)
        .layer(cors_layer(config.cors_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
}
