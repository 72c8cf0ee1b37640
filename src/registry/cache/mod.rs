use serde::Deserialize;

mod error;
mod memory_backend;
mod redis_backend;

pub use error::Error;

use memory_backend::MemoryBackend;
use redis_backend::RedisBackend;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CacheStoreConfig {
    #[serde(default)]
    pub redis: Option<RedisCacheConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RedisCacheConfig {
    pub url: String,
    #[serde(default)]
    pub key_prefix: String,
}

#[derive(Debug)]
enum Backend {
    Memory(MemoryBackend),
    Redis(RedisBackend),
}

/// Short-lived key/value storage with per-entry expiry.
///
/// Holds upstream bearer tokens and tags resolved from upstreams. Backed by process memory, or
/// by a Redis-compatible server when several instances should share it.
#[derive(Debug)]
pub struct CacheStore {
    backend: Backend,
}

impl CacheStore {
    /// Creates the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// * `Error::Backend` if the Redis URL cannot be parsed
    pub fn new(config: &CacheStoreConfig) -> Result<Self, Error> {
        let backend = match &config.redis {
            Some(config) => {
                Backend::Redis(RedisBackend::new(&config.url, config.key_prefix.clone())?)
            }
            None => Backend::Memory(MemoryBackend::new()),
        };
        Ok(CacheStore { backend })
    }

    /// Stores `value` under `key` for `ttl_secs` seconds.
    pub async fn store(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        match &self.backend {
            Backend::Memory(cache) => cache.store(key, value, ttl_secs).await,
            Backend::Redis(cache) => cache.store(key, value, ttl_secs).await,
        }
    }

    /// Retrieves the value stored under `key`.
    ///
    /// # Errors
    ///
    /// * `Error::Miss` if the key is absent or expired
    /// * `Error::Backend` if the backend failed
    pub async fn retrieve(&self, key: &str) -> Result<String, Error> {
        match &self.backend {
            Backend::Memory(cache) => cache.retrieve(key).await,
            Backend::Redis(cache) => cache.retrieve(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_cache() {
        let cache = CacheStore::new(&CacheStoreConfig::default()).unwrap();
        assert!(matches!(cache.backend, Backend::Memory(_)));

        let config = CacheStoreConfig {
            redis: Some(RedisCacheConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: "test_new_cache".to_owned(),
            }),
        };
        let cache = CacheStore::new(&config).unwrap();
        assert!(matches!(cache.backend, Backend::Redis(_)));
    }

    #[tokio::test]
    async fn test_memory_store_and_retrieve() {
        let cache = CacheStore::new(&CacheStoreConfig::default()).unwrap();

        cache.store("upstream:library/nginx", "Bearer abc", 60).await.unwrap();
        assert_eq!(
            cache.retrieve("upstream:library/nginx").await,
            Ok("Bearer abc".to_string())
        );
        assert_eq!(cache.retrieve("missing").await, Err(Error::Miss));
    }
}
