//! Redis-backed nonce store.
//!
//! Redis key pattern:
//! - `nonce:{subject}`: nonce record (JSON), expiring after the nonce TTL
//!
//! Record JSON read back from Redis is wrapped in `Zeroizing` so the nonce
//! text does not linger in freed application memory. Redis keeps its own copy
//! until the key is deleted or expires.

use super::{NonceStore, StoreError};
use crate::auth::nonce::{NonceRecord, Subject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::time::Duration;
use zeroize::Zeroizing;

/// Nonce records in Redis, shared by every replica pointing at the same server.
#[derive(Clone)]
pub struct RedisNonceStore {
    client: redis::Client,
}

impl RedisNonceStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn redis_key(subject: &Subject) -> String {
    format!("nonce:{}", subject.key())
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn put(
        &self,
        subject: &Subject,
        record: &NonceRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut con = self.connection().await?;
        let json = Zeroizing::new(serde_json::to_string(record)?);

        // SET with EX replaces the previous record in a single command
        con.set_ex::<_, _, ()>(redis_key(subject), json.as_str(), ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, subject: &Subject) -> Result<Option<NonceRecord>, StoreError> {
        let mut con = self.connection().await?;
        let json: Option<String> = con.get(redis_key(subject)).await?;

        match json {
            Some(data) => {
                let data = Zeroizing::new(data);
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, subject: &Subject) -> Result<bool, StoreError> {
        let mut con = self.connection().await?;
        let deleted: i64 = con.del(redis_key(subject)).await?;
        Ok(deleted > 0)
    }

    async fn delete_if(&self, subject: &Subject, value: &str) -> Result<bool, StoreError> {
        let mut con = self.connection().await?;

        // Lua script for atomic compare-and-delete
        let script = redis::Script::new(
            r"
            local val = redis.call('GET', KEYS[1])
            if val and cjson.decode(val)['value'] == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            ",
        );

        let deleted: i64 = script
            .key(redis_key(subject))
            .arg(value)
            .invoke_async(&mut con)
            .await?;
        Ok(deleted > 0)
    }

    async fn purge_issued_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        // Keys carry their own EX, Redis reclaims them
        Ok(0)
    }
}
