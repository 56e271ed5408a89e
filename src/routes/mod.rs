//! API route handlers.

pub mod auth;

use crate::auth::middleware::AppState;
use axum::{routing::get, routing::post, Router};

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/auth/nonce", get(auth::get_nonce).post(auth::post_nonce))
        .route("/auth/verify", post(auth::verify))
        .route("/auth/session", get(auth::session))
        .route("/auth/logout", post(auth::logout))
}
