// 数据库模块
// 限流计数器的持久化存储，是跨实例的正确性兜底

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::rate_limit::{Millis, RateLimitRecord, RateLimitRule};
use crate::strategy::Evaluation;

pub use memory::MemoryRateLimitStore;
pub use postgres::PgRateLimitStore;

/// 限流持久化存储
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// 原子地完成一次评估：读取当前记录、按规则的策略计算、写回新记录
    ///
    /// 同一个 key 的并发调用必须串行化，不能丢失更新。过期记录按不存在处理。
    async fn increment(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: Millis,
    ) -> Result<Evaluation, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// 删除 `expires_at < before` 的记录，返回删除条数；重复调用是幂等的
    async fn delete_expired(&self, before: Millis) -> Result<u64, StoreError>;
}
