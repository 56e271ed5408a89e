//! Request and response models for the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nonce request, as a query string or a JSON body.
///
/// `address` is required when nonces are bound to addresses and ignored
/// when they are bound to the session.
#[derive(Debug, Default, Deserialize)]
pub struct NonceRequest {
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub nonce: String,
}

/// Sign-in request.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Canonical message text, or the message as a field object.
    pub message: serde_json::Value,
    /// 65-byte `personal_sign` signature, hex encoded.
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub ok: bool,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub address: String,
    pub chain_id: u64,
    pub expires_at: DateTime<Utc>,
}
