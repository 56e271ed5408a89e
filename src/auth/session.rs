//! Session identifiers and the cookie-carried session value.
//!
//! The session is an immutable value rewritten by each handshake step and
//! stored in an encrypted, authenticated cookie:
//!
//! ```text
//! (no cookie) --nonce--> Pending { id, nonce } --verify ok--> Authenticated { .. }
//!                               |
//!                               +--verify failed--> (no cookie)
//! ```

use crate::auth::address::EvmAddress;
use crate::auth::verifier::VerifiedLogin;
use crate::config::Config;
use crate::error::AppError;
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Generate a cryptographically random session identifier.
///
/// Returns a base64-encoded string (44 characters) from 32 random bytes.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    general_purpose::STANDARD.encode(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Session {
    /// A nonce has been handed out and not yet used.
    Pending { id: String, nonce: String },

    /// Signed in with a verified address.
    Authenticated {
        id: String,
        address: EvmAddress,
        chain_id: u64,
        authenticated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl Session {
    pub fn pending(id: String, nonce: String) -> Self {
        Session::Pending { id, nonce }
    }

    /// The authenticated successor of a login. The session id is rotated.
    pub fn authenticated(login: &VerifiedLogin, now: DateTime<Utc>, ttl: Duration) -> Self {
        Session::Authenticated {
            id: generate_session_id(),
            address: login.address,
            chain_id: login.chain_id,
            authenticated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Session::Pending { id, .. } | Session::Authenticated { id, .. } => id,
        }
    }

    /// The verified address, if signed in and not past `expires_at`.
    pub fn address_at(&self, now: DateTime<Utc>) -> Option<&EvmAddress> {
        match self {
            Session::Authenticated {
                address,
                expires_at,
                ..
            } if now < *expires_at => Some(address),
            _ => None,
        }
    }
}

/// Read the session from the encrypted cookie. Undecodable values are treated
/// as no session.
pub fn read_session(jar: &PrivateCookieJar, config: &Config) -> Option<Session> {
    jar.get(&config.cookie_name)
        .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
}

/// Replace the session cookie.
pub fn write_session(
    jar: PrivateCookieJar,
    config: &Config,
    session: &Session,
) -> Result<PrivateCookieJar, AppError> {
    let value = serde_json::to_string(session)?;
    let cookie = Cookie::build((config.cookie_name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax);
    Ok(jar.add(cookie))
}

/// Remove the session cookie.
pub fn clear_session(jar: PrivateCookieJar, config: &Config) -> PrivateCookieJar {
    jar.remove(Cookie::build((config.cookie_name.clone(), "")).path("/"))
}
