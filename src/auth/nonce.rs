//! Nonce issuance and lifecycle.
//!
//! Per subject: `NoNonce -> Issued -> (Consumed | Expired) -> NoNonce`, with
//! `Issued -> Issued` on re-issue. Expiry is evaluated against the injected
//! clock at lookup time; there is no timer per nonce.

use crate::auth::address::EvmAddress;
use crate::auth::clock::Clock;
use crate::storage::{NonceStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use rand::TryRngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Length of generated nonces, in characters.
pub const NONCE_LEN: usize = 32;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Who a nonce is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// A wallet address, keyed by its lower-case form.
    Address(EvmAddress),
    /// An opaque session identifier.
    Session(String),
}

impl Subject {
    pub fn session(id: impl Into<String>) -> Result<Self, InvalidSubject> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(InvalidSubject);
        }
        Ok(Subject::Session(id))
    }

    /// Storage key, unique across both kinds of subject.
    pub fn key(&self) -> String {
        match self {
            Subject::Address(address) => format!("address:{}", address),
            Subject::Session(id) => format!("session:{}", id),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Address(address) => write!(f, "{}", address),
            // Session ids are bearer-like, keep them out of logs
            Subject::Session(_) => write!(f, "session"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("subject must not be empty")]
pub struct InvalidSubject;

/// A stored nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

/// The randomness source could not produce a nonce.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("nonce generation failed: {0}")]
pub struct GenerationError(pub String);

/// Source of nonce values.
pub trait NonceGenerator: Send + Sync {
    fn generate(&self) -> Result<String, GenerationError>;
}

/// Alphanumeric nonces drawn from the operating system CSPRNG.
///
/// A failing OS source is reported, never replaced by a weaker generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsNonceGenerator;

impl NonceGenerator for OsNonceGenerator {
    fn generate(&self) -> Result<String, GenerationError> {
        let mut out = String::with_capacity(NONCE_LEN);
        let mut buf = [0u8; NONCE_LEN];

        while out.len() < NONCE_LEN {
            rand::rngs::OsRng
                .try_fill_bytes(&mut buf)
                .map_err(|e| GenerationError(e.to_string()))?;

            // Rejection sampling: 248 = 4 * 62 keeps the alphabet unbiased
            for b in buf {
                if b < 248 && out.len() < NONCE_LEN {
                    out.push(ALPHABET[(b % 62) as usize] as char);
                }
            }
        }

        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("nonce store error: {0}")]
    Store(#[from] StoreError),
}

/// Issues single-use nonces bound to a subject with a bounded lifetime.
#[derive(Clone)]
pub struct NonceAuthority {
    store: Arc<dyn NonceStore>,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn NonceGenerator>,
    ttl: Duration,
}

impl NonceAuthority {
    pub fn new(store: Arc<dyn NonceStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self::with_generator(store, clock, Arc::new(OsNonceGenerator), ttl)
    }

    pub fn with_generator(
        store: Arc<dyn NonceStore>,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn NonceGenerator>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            generator,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Issue a fresh nonce for `subject`, invalidating any previous one.
    pub async fn issue(&self, subject: &Subject) -> Result<String, IssueError> {
        let value = self.generator.generate()?;
        let record = NonceRecord {
            value,
            issued_at: self.clock.now(),
        };

        let ttl = self.ttl.to_std().unwrap_or_default();
        self.store.put(subject, &record, ttl).await?;

        tracing::debug!(action = "nonce_issued", subject = %subject, "Nonce issued");
        Ok(record.value)
    }

    /// The currently valid nonce for `subject`, if any.
    ///
    /// An expired record is removed on the way out.
    pub async fn get(&self, subject: &Subject) -> Result<Option<String>, StoreError> {
        let Some(record) = self.store.get(subject).await? else {
            return Ok(None);
        };

        if self.is_expired(&record) {
            // Only remove the record we looked at, not one re-issued meanwhile
            self.store.delete_if(subject, &record.value).await?;
            tracing::debug!(action = "nonce_expired", subject = %subject, "Expired nonce purged");
            return Ok(None);
        }

        Ok(Some(record.value))
    }

    /// Remove any nonce for `subject`. Idempotent.
    pub async fn consume(&self, subject: &Subject) -> Result<(), StoreError> {
        self.store.delete(subject).await?;
        Ok(())
    }

    /// Remove the nonce for `subject` only if it is still `nonce`.
    ///
    /// Returns false when another request consumed or replaced it first.
    pub async fn consume_if(&self, subject: &Subject, nonce: &str) -> Result<bool, StoreError> {
        self.store.delete_if(subject, nonce).await
    }

    /// Drop every expired record from the store.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.store
            .purge_issued_before(self.clock.now() - self.ttl)
            .await
    }

    fn is_expired(&self, record: &NonceRecord) -> bool {
        self.clock.now() - record.issued_at > self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::FakeClock;
    use crate::storage::memory::MemoryNonceStore;

    struct FailingGenerator;

    impl NonceGenerator for FailingGenerator {
        fn generate(&self) -> Result<String, GenerationError> {
            Err(GenerationError("entropy source unavailable".to_string()))
        }
    }

    fn authority() -> (NonceAuthority, FakeClock, Arc<MemoryNonceStore>) {
        let clock = FakeClock::new();
        let store = Arc::new(MemoryNonceStore::new());
        let authority = NonceAuthority::new(
            store.clone(),
            Arc::new(clock.clone()),
            Duration::minutes(5),
        );
        (authority, clock, store)
    }

    fn alice() -> Subject {
        Subject::Address(
            EvmAddress::parse("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap(),
        )
    }

    #[test]
    fn test_generated_nonce_format() {
        let nonce = OsNonceGenerator.generate().unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_nonces_are_unique() {
        let a = OsNonceGenerator.generate().unwrap();
        let b = OsNonceGenerator.generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_subject_keys_do_not_collide() {
        let address = alice();
        let session = Subject::session(address.key()).unwrap();
        assert_ne!(address.key(), session.key());
        assert_eq!(
            address.key(),
            "address:0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );
    }

    #[test]
    fn test_empty_session_subject_rejected() {
        assert_eq!(Subject::session(""), Err(InvalidSubject));
        assert_eq!(Subject::session("   "), Err(InvalidSubject));
    }

    #[tokio::test]
    async fn test_issue_then_get() {
        let (authority, _, _) = authority();
        let nonce = authority.issue(&alice()).await.unwrap();
        assert_eq!(authority.get(&alice()).await.unwrap(), Some(nonce));
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous() {
        let (authority, _, _) = authority();
        let first = authority.issue(&alice()).await.unwrap();
        let second = authority.issue(&alice()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(authority.get(&alice()).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_expired_nonce_is_absent_and_purged() {
        let (authority, clock, store) = authority();
        authority.issue(&alice()).await.unwrap();

        clock.advance(Duration::minutes(5));
        assert!(authority.get(&alice()).await.unwrap().is_some());

        clock.advance(Duration::seconds(1));
        assert_eq!(authority.get(&alice()).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_consume_is_idempotent() {
        let (authority, _, _) = authority();
        authority.issue(&alice()).await.unwrap();

        authority.consume(&alice()).await.unwrap();
        authority.consume(&alice()).await.unwrap();
        assert_eq!(authority.get(&alice()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_consume_if_only_once() {
        let (authority, _, _) = authority();
        let nonce = authority.issue(&alice()).await.unwrap();

        assert!(authority.consume_if(&alice(), &nonce).await.unwrap());
        assert!(!authority.consume_if(&alice(), &nonce).await.unwrap());
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported() {
        let authority = NonceAuthority::with_generator(
            Arc::new(MemoryNonceStore::new()),
            Arc::new(FakeClock::new()),
            Arc::new(FailingGenerator),
            Duration::minutes(5),
        );

        let result = authority.issue(&alice()).await;
        assert!(matches!(result, Err(IssueError::Generation(_))));
        assert_eq!(authority.get(&alice()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (authority, clock, store) = authority();
        authority.issue(&alice()).await.unwrap();
        clock.advance(Duration::minutes(3));
        authority
            .issue(&Subject::session("sess-1").unwrap())
            .await
            .unwrap();

        clock.advance(Duration::minutes(3));
        assert_eq!(authority.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_issue_leaves_one_consistent_record() {
        let (authority, _, store) = authority();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let authority = authority.clone();
                tokio::spawn(async move { authority.issue(&alice()).await.unwrap() })
            })
            .collect();

        let mut issued = Vec::new();
        for handle in handles {
            issued.push(handle.await.unwrap());
        }

        let stored = authority.get(&alice()).await.unwrap().unwrap();
        assert!(issued.contains(&stored));
        assert_eq!(store.len(), 1);
    }
}
