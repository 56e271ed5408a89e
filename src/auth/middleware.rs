//! Shared application state and the authenticated-session extractor.

use crate::auth::address::EvmAddress;
use crate::auth::clock::Clock;
use crate::auth::session::{read_session, Session};
use crate::auth::verifier::SignatureVerifier;
use crate::config::Config;
use crate::error::AppError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::{Key, PrivateCookieJar};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: SignatureVerifier,
    pub cookie_key: Key,
}

impl AppState {
    /// Build state from config. `config.session_key` must already be validated.
    pub fn new(config: Config, verifier: SignatureVerifier) -> Self {
        let cookie_key = Key::from(config.session_key.as_slice());
        Self {
            config: Arc::new(config),
            verifier,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Authenticated session extractor.
///
/// Reads the encrypted session cookie. Returns 401 Unauthorized unless the
/// session is authenticated and not expired.
pub struct AuthSession {
    pub address: EvmAddress,
    pub chain_id: u64,
    pub expires_at: DateTime<Utc>,
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = PrivateCookieJar::<Key>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Unauthorized("Not signed in".to_string()))?;

        let session = read_session(&jar, &state.config)
            .ok_or_else(|| AppError::Unauthorized("Not signed in".to_string()))?;

        let now = state.verifier.nonces().clock().now();
        let address = *session
            .address_at(now)
            .ok_or_else(|| AppError::Unauthorized("Not signed in".to_string()))?;

        match session {
            Session::Authenticated {
                chain_id,
                expires_at,
                ..
            } => Ok(AuthSession {
                address,
                chain_id,
                expires_at,
            }),
            Session::Pending { .. } => Err(AppError::Unauthorized("Not signed in".to_string())),
        }
    }
}
