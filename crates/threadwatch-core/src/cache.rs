//! `ResponseCache`: a keyed blob store with TTL (spec section 6).
//!
//! Like [`crate::Provider`], this is a collaborator trait — the engine
//! only depends on this shape. An in-process LRU, Redis, or on-disk
//! implementation can all satisfy it.

use async_trait::async_trait;
use std::time::Duration;

/// A keyed blob store with per-entry TTL.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Looks up `key`, returning `None` on a miss or an expired entry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Stores `value` under `key` with the given time-to-live.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Self::Error>;

    /// Deletes every key matching `key_pattern` (implementation-defined
    /// glob/prefix semantics).
    async fn delete(&self, key_pattern: &str) -> Result<(), Self::Error>;

    /// Releases any held resources (connections, file handles).
    async fn close(&self) -> Result<(), Self::Error>;
}
