//! Nonce storage backends.
//!
//! [`NonceStore`] is the seam between the nonce lifecycle rules and where the
//! records physically live. Two backends ship with the service:
//! - [`memory::MemoryNonceStore`]: process-local, the default
//! - [`redis_store::RedisNonceStore`]: shared between replicas, keys expire natively
//!
//! Stores do not interpret expiry themselves on read. `NonceAuthority` decides
//! validity from `issued_at` and its clock; the `ttl` passed to `put` is only a
//! hint for backends that can reclaim space on their own.

pub mod memory;
pub mod redis_store;

use crate::auth::nonce::{NonceRecord, Subject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Store `record` for `subject`, replacing any previous record.
    async fn put(
        &self,
        subject: &Subject,
        record: &NonceRecord,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn get(&self, subject: &Subject) -> Result<Option<NonceRecord>, StoreError>;

    /// Remove the record for `subject`. Returns whether one existed.
    async fn delete(&self, subject: &Subject) -> Result<bool, StoreError>;

    /// Remove the record for `subject` only if its value is `value`.
    ///
    /// Must be atomic with respect to concurrent `put`/`delete_if` on the same
    /// subject. Returns whether a record was removed.
    async fn delete_if(&self, subject: &Subject, value: &str) -> Result<bool, StoreError>;

    /// Remove every record issued before `cutoff`. Returns how many were removed.
    async fn purge_issued_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
