//! Background sweep of expired nonces.
//!
//! Expiry is already enforced at lookup time, so this job only reclaims
//! memory held by nonces that were issued and never used. The Redis store
//! expires keys itself and reports nothing to purge.

use crate::auth::nonce::NonceAuthority;
use std::time::Duration;

/// Run the cleanup loop, purging expired nonces every `interval`.
pub async fn run_cleanup_loop(nonces: NonceAuthority, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        purge_once(&nonces).await;
    }
}

/// One sweep. Returns the number of records removed.
pub async fn purge_once(nonces: &NonceAuthority) -> usize {
    match nonces.purge_expired().await {
        Ok(0) => 0,
        Ok(purged) => {
            tracing::info!(action = "nonce_cleanup", purged, "Cleanup job completed");
            purged
        }
        Err(e) => {
            tracing::error!(error = %e, "Cleanup job failed");
            0
        }
    }
}
