pub mod health;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /generate_images                                 run one generation (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().route(
        "/generate_images",
        post(handlers::generation::generate_images),
    )
}

/// Root-level routes kept for clients of the original web UI, which posts
/// to `/generate_images/` with a trailing slash.
///
/// ```text
/// /generate_images/                                same handler as /api/v1/generate_images
/// ```
pub fn compat_routes() -> Router<AppState> {
    Router::new().route(
        "/generate_images/",
        post(handlers::generation::generate_images),
    )
}
