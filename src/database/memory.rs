use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::RateLimitStore;
use crate::error::StoreError;
use crate::rate_limit::{Millis, RateLimitRecord, RateLimitRule};
use crate::strategy::{Evaluation, Strategy};

/// 进程内限流存储
///
/// 没有配置数据库时使用，重启后计数丢失。
#[derive(Debug, Clone, Default)]
pub struct MemoryRateLimitStore {
    records: Arc<RwLock<HashMap<String, RateLimitRecord>>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: Millis,
    ) -> Result<Evaluation, StoreError> {
        // 写锁覆盖整个读-算-写过程
        let mut records = self.records.write().await;
        let current = records.get(key).filter(|record| !record.is_expired(now));
        let eval = Strategy::from(rule.strategy()).evaluate(key, rule, current, now);
        records.insert(key.to_string(), eval.record.clone());
        Ok(eval)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn delete_expired(&self, before: Millis) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let total = records.len();
        records.retain(|_, record| !record.is_expired(before));
        Ok((total - records.len()) as u64)
    }
}
