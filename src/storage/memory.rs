//! Process-local nonce store.

use super::{NonceStore, StoreError};
use crate::auth::nonce::{NonceRecord, Subject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// Nonce records in a sharded concurrent map.
///
/// Each operation holds the shard lock for its key only, so per-subject
/// read-modify-write is atomic without serializing unrelated subjects.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    records: DashMap<String, NonceRecord>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn put(
        &self,
        subject: &Subject,
        record: &NonceRecord,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        self.records.insert(subject.key(), record.clone());
        Ok(())
    }

    async fn get(&self, subject: &Subject) -> Result<Option<NonceRecord>, StoreError> {
        Ok(self.records.get(&subject.key()).map(|r| r.value().clone()))
    }

    async fn delete(&self, subject: &Subject) -> Result<bool, StoreError> {
        Ok(self.records.remove(&subject.key()).is_some())
    }

    async fn delete_if(&self, subject: &Subject, value: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .remove_if(&subject.key(), |_, record| record.value == value)
            .is_some())
    }

    async fn purge_issued_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = record.issued_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
