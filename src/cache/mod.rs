//! Best-effort cache side channel.
//!
//! Never authoritative. Every backend error is swallowed here and treated as
//! a miss, and a disabled cache behaves like an always-empty one.

pub mod memory;
pub mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::CacheError;

pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

/// Raw key/value operations a cache backend must provide.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob (`*`, `?`). Returns the count removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

/// Failure-transparent cache handle.
#[derive(Clone, Default)]
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Cached value, or `None` on miss, decode failure, or backend error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(key, error = %e, "Cache entry undecodable, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let Some(backend) = &self.backend else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key, error = %e, "Cache value not serializable, skipped");
                return;
            }
        };
        if let Err(e) = backend
            .set(key, &raw, Duration::from_secs(ttl_seconds))
            .await
        {
            debug!(key, error = %e, "Cache set failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Some(backend) = &self.backend
            && let Err(e) = backend.delete(key).await
        {
            debug!(key, error = %e, "Cache delete failed");
        }
    }

    /// Returns how many keys were removed (0 on any failure).
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = &self.backend else {
            return 0;
        };
        match backend.delete_by_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                debug!(pattern, error = %e, "Cache pattern delete failed");
                0
            }
        }
    }
}
