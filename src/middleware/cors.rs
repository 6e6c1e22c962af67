use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

/// Restricts to `origin` when configured, otherwise allows any origin.
pub fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => layer.allow_origin(value),
        Some(Err(_)) => {
            tracing::warn!("CORS_ORIGIN is not a valid header value; allowing any origin");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}
