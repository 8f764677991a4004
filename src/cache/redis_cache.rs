use std::sync::Arc;

use redis::{AsyncCommands, Client as RedisClient};

use crate::error::CacheError;
use crate::rate_limit::RateLimitRecord;

/// Redis 中限流记录的 key 前缀
const RATE_LIMIT_CACHE_PREFIX: &str = "rate_limit:";

/// Redis 限流缓存
#[derive(Clone)]
pub struct RedisCache {
    redis: Arc<RedisClient>,
}

impl RedisCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = RedisClient::open(url)?;
        Ok(Self::new(Arc::new(client)))
    }

    fn redis_key(key: &str) -> String {
        format!("{}{}", RATE_LIMIT_CACHE_PREFIX, key)
    }

    /// 获取限流记录
    pub async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let result: Option<String> = conn.get(Self::redis_key(key)).await?;
        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// 写入限流记录，TTL 以毫秒计
    pub async fn set(
        &self,
        key: &str,
        record: &RateLimitRecord,
        ttl_ms: u64,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let _: () = conn
            .pset_ex(Self::redis_key(key), json, ttl_ms.max(1))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: () = conn.del(Self::redis_key(key)).await?;
        Ok(())
    }

    pub async fn healthcheck(&self) -> Result<bool, CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
