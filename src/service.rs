//! 限流服务
//!
//! 把策略、缓存和持久化存储串起来，对每个请求给出放行/拒绝决策。
//!
//! 每次评估都交给存储的原子 `increment`：读取、策略计算、写回在存储内一次完成，
//! 多个实例共享同一个存储时也不会丢失更新。评估结果随后写入缓存，
//! 缓存只服务于 [`RateLimitService::peek`] 这类只读查询，从不作为写入的基准。
//!
//! 存储错误原样返回给调用方，由 [`FailurePolicy`] 决定放行还是拒绝；
//! 缓存错误在缓存层内部就被吞掉了。

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::RateLimitCache;
use crate::database::RateLimitStore;
use crate::error::{ConfigError, RateLimitError, StoreError};
use crate::rate_limit::{Decision, Millis, RateLimitKey, RateLimitRecord, RateLimitRule, now_millis};
use crate::strategy::Evaluation;

/// 存储不可用时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 放行
    #[default]
    Open,
    /// 拒绝
    Closed,
}

impl FailurePolicy {
    /// 评估失败时使用的决策
    pub fn fallback(&self, rule: &RateLimitRule, now: Millis) -> Decision {
        match self {
            FailurePolicy::Open => Decision {
                limited: false,
                remaining: rule.max_requests(),
                reset_at: now,
                limit: rule.max_requests(),
            },
            FailurePolicy::Closed => Decision {
                limited: true,
                remaining: 0,
                reset_at: now.saturating_add(rule.window_ms()),
                limit: rule.max_requests(),
            },
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(FailurePolicy::Open),
            "closed" | "fail-closed" => Ok(FailurePolicy::Closed),
            other => Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_FAILURE_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

pub struct RateLimitService {
    cache: Arc<RateLimitCache>,
    store: Arc<dyn RateLimitStore>,
    policy: FailurePolicy,
}

impl RateLimitService {
    pub fn new(
        cache: Arc<RateLimitCache>,
        store: Arc<dyn RateLimitStore>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            cache,
            store,
            policy,
        }
    }

    pub fn cache(&self) -> &RateLimitCache {
        &self.cache
    }

    pub fn store(&self) -> Arc<dyn RateLimitStore> {
        Arc::clone(&self.store)
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn check(
        &self,
        key: &RateLimitKey,
        rule: &RateLimitRule,
    ) -> Result<Decision, RateLimitError> {
        self.check_at(key, rule, now_millis()).await
    }

    pub async fn check_at(
        &self,
        key: &RateLimitKey,
        rule: &RateLimitRule,
        now: Millis,
    ) -> Result<Decision, RateLimitError> {
        let key = key.render();
        let Evaluation { decision, record } = self.store.increment(&key, rule, now).await?;

        self.cache.set(&key, &record, record.ttl_ms(now)).await;

        debug!(
            key = %key,
            strategy = %rule.strategy(),
            limited = decision.limited,
            remaining = decision.remaining,
            "Rate limit evaluated"
        );
        Ok(decision)
    }

    /// 评估失败时按策略兜底，返回的决策总是可用
    pub async fn check_or_fallback(&self, key: &RateLimitKey, rule: &RateLimitRule) -> Decision {
        let now = now_millis();
        match self.check_at(key, rule, now).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    "Rate limit evaluation failed for {}, applying {:?} policy: {}",
                    key,
                    self.policy,
                    e
                );
                self.policy.fallback(rule, now)
            }
        }
    }

    /// 查看当前记录，过期记录视为不存在；可能读到本实例缓存里稍旧的记录
    pub async fn peek(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let now = now_millis();
        let record = match self.cache.get(key).await {
            Some(record) => Some(record),
            None => self.store.get(key).await?,
        };
        Ok(record.filter(|record| !record.is_expired(now)))
    }

    /// 清空某个 key 的计数
    pub async fn reset(&self, key: &str) -> Result<bool, StoreError> {
        self.cache.delete(key).await;
        self.store.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::database::MemoryRateLimitStore;
    use crate::rate_limit::{RecordState, StrategyKind};

    struct BrokenStore;

    #[async_trait]
    impl RateLimitStore for BrokenStore {
        async fn increment(
            &self,
            _key: &str,
            _rule: &RateLimitRule,
            _now: Millis,
        ) -> Result<Evaluation, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn get(&self, _key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn delete_expired(&self, _before: Millis) -> Result<u64, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    /// 每次调用前等待 1ms，模拟数据库往返
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryRateLimitStore,
    }

    #[async_trait]
    impl RateLimitStore for SlowStore {
        async fn increment(
            &self,
            key: &str,
            rule: &RateLimitRule,
            now: Millis,
        ) -> Result<Evaluation, StoreError> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.inner.increment(key, rule, now).await
        }

        async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn delete_expired(&self, before: Millis) -> Result<u64, StoreError> {
            self.inner.delete_expired(before).await
        }
    }

    fn service(cache: RateLimitCache) -> (RateLimitService, Arc<MemoryRateLimitStore>) {
        let store = Arc::new(MemoryRateLimitStore::new());
        let service = RateLimitService::new(Arc::new(cache), store.clone(), FailurePolicy::Open);
        (service, store)
    }

    #[tokio::test]
    async fn test_fixed_window_through_store_increment() {
        let (service, store) = service(RateLimitCache::memory(100));
        let rule = RateLimitRule::new(2, 1000, StrategyKind::FixedWindow).unwrap();
        let key = RateLimitKey::ip("10.0.0.1", "api");

        assert!(service.check_at(&key, &rule, 0).await.unwrap().allowed());
        assert!(service.check_at(&key, &rule, 1).await.unwrap().allowed());
        let third = service.check_at(&key, &rule, 2).await.unwrap();
        assert!(third.limited);
        assert_eq!(third.reset_at, 1000);

        let stored = store.get(&key.render()).await.unwrap().unwrap();
        assert_eq!(
            stored.state,
            RecordState::FixedWindow {
                window_start: 0,
                count: 3
            }
        );
    }

    #[tokio::test]
    async fn test_store_is_backstop_without_cache() {
        let (service, store) = service(RateLimitCache::NoOp);
        let rule = RateLimitRule::new(3, 1000, StrategyKind::TokenBucket).unwrap();
        let key = RateLimitKey::user("u-1", "api");

        for _ in 0..3 {
            assert!(service.check_at(&key, &rule, 0).await.unwrap().allowed());
        }
        assert!(service.check_at(&key, &rule, 0).await.unwrap().limited);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_is_populated_for_sliding_window() {
        let (service, _store) = service(RateLimitCache::memory(100));
        let rule = RateLimitRule::new(5, 1000, StrategyKind::SlidingWindow).unwrap();
        let key = RateLimitKey::api_key("key-1", "search");

        service.check_at(&key, &rule, 10).await.unwrap();
        let cached = service.cache().get(&key.render()).await.unwrap();
        assert_eq!(
            cached.state,
            RecordState::SlidingWindow {
                current_window_start: 0,
                current_count: 1,
                previous_count: 0
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key_never_exceeds_limit() {
        for kind in StrategyKind::ALL {
            let store = Arc::new(SlowStore::default());
            let service = Arc::new(RateLimitService::new(
                Arc::new(RateLimitCache::memory(100)),
                store,
                FailurePolicy::Open,
            ));
            let rule = RateLimitRule::new(10, 60_000, kind).unwrap();
            let key = RateLimitKey::ip("10.0.0.9", "burst");

            let handles: Vec<_> = (0..100)
                .map(|_| {
                    let service = Arc::clone(&service);
                    let key = key.clone();
                    tokio::spawn(async move { service.check_at(&key, &rule, 1_000).await })
                })
                .collect();

            let mut admitted = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap().allowed() {
                    admitted += 1;
                }
            }
            assert_eq!(admitted, 10, "{} admitted {} of 100", kind, admitted);
        }
    }

    #[tokio::test]
    async fn test_instances_sharing_store_do_not_overwrite_each_other() {
        for kind in StrategyKind::ALL {
            let store: Arc<dyn RateLimitStore> = Arc::new(MemoryRateLimitStore::new());
            let a = RateLimitService::new(
                Arc::new(RateLimitCache::memory(100)),
                store.clone(),
                FailurePolicy::Open,
            );
            let b = RateLimitService::new(
                Arc::new(RateLimitCache::memory(100)),
                store.clone(),
                FailurePolicy::Open,
            );
            let rule = RateLimitRule::new(5, 60_000, kind).unwrap();
            let key = RateLimitKey::user("shared", "api");

            let mut admitted = 0;
            for (instance, times) in [(&a, 1), (&b, 4), (&a, 10), (&b, 10)] {
                for _ in 0..times {
                    if instance.check_at(&key, &rule, 1_000).await.unwrap().allowed() {
                        admitted += 1;
                    }
                }
            }
            assert_eq!(admitted, 5, "{} admitted {} across instances", kind, admitted);
        }
    }

    #[tokio::test]
    async fn test_reset_clears_cache_and_store() {
        let (service, store) = service(RateLimitCache::memory(100));
        let rule = RateLimitRule::new(1, 60_000, StrategyKind::FixedWindow).unwrap();
        let key = RateLimitKey::user("u-2", "login");

        let now = now_millis();
        assert!(service.check_at(&key, &rule, now).await.unwrap().allowed());
        assert!(service.check_at(&key, &rule, now).await.unwrap().limited);
        assert!(service.peek(&key.render()).await.unwrap().is_some());

        assert!(service.reset(&key.render()).await.unwrap());
        assert!(store.is_empty().await);
        assert!(service.peek(&key.render()).await.unwrap().is_none());
        assert!(service.check_at(&key, &rule, now).await.unwrap().allowed());
    }

    #[tokio::test]
    async fn test_store_failure_propagates_and_policy_decides() {
        let rule = RateLimitRule::new(5, 1000, StrategyKind::SlidingWindow).unwrap();
        let key = RateLimitKey::ip("10.0.0.2", "api");

        let open = RateLimitService::new(
            Arc::new(RateLimitCache::NoOp),
            Arc::new(BrokenStore),
            FailurePolicy::Open,
        );
        assert!(matches!(
            open.check_at(&key, &rule, 0).await,
            Err(RateLimitError::Store(_))
        ));
        assert!(open.check_or_fallback(&key, &rule).await.allowed());

        let closed = RateLimitService::new(
            Arc::new(RateLimitCache::NoOp),
            Arc::new(BrokenStore),
            FailurePolicy::Closed,
        );
        let decision = closed.check_or_fallback(&key, &rule).await;
        assert!(decision.limited);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("open".parse::<FailurePolicy>().unwrap(), FailurePolicy::Open);
        assert_eq!("Fail-Closed".parse::<FailurePolicy>().unwrap(), FailurePolicy::Closed);
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }
}
