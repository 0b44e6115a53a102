use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

fn build_localhost_cors(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{port}"),
        format!("http://localhost:{port}"),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

/// The complete serving surface. New endpoints never add routes: they are
/// rows reached through the single data route.
pub fn build_router(state: AppState, port: u16) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/data/{endpoint_id}", get(handlers::get_endpoint_data))
        .route("/api/endpoints", get(handlers::list_endpoints))
        .route(
            "/api/endpoints/{endpoint_id}",
            delete(handlers::delete_endpoint),
        )
        .layer(build_localhost_cors(port))
        .with_state(state)
}
