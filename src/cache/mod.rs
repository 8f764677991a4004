// 缓存模块
// 限流记录的热路径缓存：Redis、本地 LRU 或完全关闭
//
// 缓存只是优化层，读写失败都按未命中/空操作处理，正确性由持久化存储保证。

pub mod memory;
pub mod redis_cache;

use std::str::FromStr;

use tracing::{info, warn};

use crate::error::ConfigError;
use crate::rate_limit::RateLimitRecord;

pub use memory::{CacheStats, DEFAULT_LRU_CAPACITY, MemoryLruCache};
pub use redis_cache::RedisCache;

/// 缓存选择方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// 配置了 Redis 且可用时用 Redis，否则用本地 LRU
    #[default]
    Auto,
    Redis,
    Memory,
    None,
}

impl FromStr for CacheMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(CacheMode::Auto),
            "redis" => Ok(CacheMode::Redis),
            "memory" | "lru" => Ok(CacheMode::Memory),
            "none" | "off" => Ok(CacheMode::None),
            other => Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_CACHE",
                value: other.to_string(),
            }),
        }
    }
}

/// 限流缓存
pub enum RateLimitCache {
    Redis(RedisCache),
    Memory(MemoryLruCache),
    NoOp,
}

impl RateLimitCache {
    pub fn memory(capacity: usize) -> Self {
        RateLimitCache::Memory(MemoryLruCache::new(capacity))
    }

    /// 按配置建立缓存，Redis 不可用时退回本地 LRU
    pub async fn connect(mode: CacheMode, redis_url: Option<&str>, capacity: usize) -> Self {
        let url = match (mode, redis_url) {
            (CacheMode::None, _) => return RateLimitCache::NoOp,
            (CacheMode::Memory, _) => return Self::memory(capacity),
            (CacheMode::Auto, None) => return Self::memory(capacity),
            (CacheMode::Redis, None) => {
                warn!("RATE_LIMIT_CACHE=redis but REDIS_URL is not set, using in-memory LRU cache");
                return Self::memory(capacity);
            }
            (_, Some(url)) => url,
        };

        let cache = match RedisCache::open(url) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Failed to create Redis client, using in-memory LRU cache: {}", e);
                return Self::memory(capacity);
            }
        };

        match cache.healthcheck().await {
            Ok(true) => {
                info!("Using Redis rate limit cache");
                RateLimitCache::Redis(cache)
            }
            Ok(false) => {
                warn!("Redis healthcheck failed, using in-memory LRU cache");
                Self::memory(capacity)
            }
            Err(e) => {
                warn!("Redis unreachable, using in-memory LRU cache: {}", e);
                Self::memory(capacity)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RateLimitCache::Redis(_) => "redis",
            RateLimitCache::Memory(_) => "memory",
            RateLimitCache::NoOp => "none",
        }
    }

    pub async fn get(&self, key: &str) -> Option<RateLimitRecord> {
        match self {
            RateLimitCache::Redis(cache) => match cache.get(key).await {
                Ok(record) => record,
                Err(e) => {
                    warn!("Rate limit cache read failed for {}: {}", key, e);
                    None
                }
            },
            RateLimitCache::Memory(cache) => cache.get(key).await,
            RateLimitCache::NoOp => None,
        }
    }

    pub async fn set(&self, key: &str, record: &RateLimitRecord, ttl_ms: u64) {
        match self {
            RateLimitCache::Redis(cache) => {
                if let Err(e) = cache.set(key, record, ttl_ms).await {
                    warn!("Rate limit cache write failed for {}: {}", key, e);
                }
            }
            RateLimitCache::Memory(cache) => cache.set(key, record.clone(), ttl_ms).await,
            RateLimitCache::NoOp => {}
        }
    }

    pub async fn delete(&self, key: &str) {
        match self {
            RateLimitCache::Redis(cache) => {
                if let Err(e) = cache.delete(key).await {
                    warn!("Rate limit cache delete failed for {}: {}", key, e);
                }
            }
            RateLimitCache::Memory(cache) => {
                cache.delete(key).await;
            }
            RateLimitCache::NoOp => {}
        }
    }

    /// 只有本地 LRU 有统计
    pub async fn stats(&self) -> Option<CacheStats> {
        match self {
            RateLimitCache::Memory(cache) => Some(cache.stats().await),
            _ => None,
        }
    }

    pub async fn healthcheck(&self) -> bool {
        match self {
            RateLimitCache::Redis(cache) => cache.healthcheck().await.unwrap_or_else(|e| {
                warn!("Rate limit cache healthcheck failed: {}", e);
                false
            }),
            RateLimitCache::Memory(_) | RateLimitCache::NoOp => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RecordState;

    fn record() -> RateLimitRecord {
        RateLimitRecord {
            key: "k".into(),
            state: RecordState::TokenBucket {
                tokens: 2.5,
                last_refill_at: 10,
            },
            expires_at: 1010,
        }
    }

    #[tokio::test]
    async fn test_noop_always_misses() {
        let cache = RateLimitCache::NoOp;
        cache.set("k", &record(), 60_000).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.healthcheck().await);
        assert_eq!(cache.name(), "none");
    }

    #[tokio::test]
    async fn test_memory_variant_round_trip() {
        let cache = RateLimitCache::memory(10);
        cache.set("k", &record(), 60_000).await;
        assert_eq!(cache.get("k").await, Some(record()));
        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_memory() {
        let cache = RateLimitCache::connect(CacheMode::Auto, None, 10).await;
        assert_eq!(cache.name(), "memory");

        let cache = RateLimitCache::connect(CacheMode::Redis, Some("not-a-redis-url"), 10).await;
        assert_eq!(cache.name(), "memory");

        let cache = RateLimitCache::connect(CacheMode::None, Some("redis://127.0.0.1"), 10).await;
        assert_eq!(cache.name(), "none");
    }

    #[test]
    fn test_cache_mode_parse() {
        assert_eq!("Redis".parse::<CacheMode>().unwrap(), CacheMode::Redis);
        assert_eq!("lru".parse::<CacheMode>().unwrap(), CacheMode::Memory);
        assert_eq!("off".parse::<CacheMode>().unwrap(), CacheMode::None);
        assert!("memcached".parse::<CacheMode>().is_err());
    }
}
