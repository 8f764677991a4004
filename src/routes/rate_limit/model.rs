use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::error::ConfigError;
use crate::rate_limit::{Decision, Millis, RateLimitRecord, RateLimitRule, Scope};
use crate::strategy::get_strategy;

// 手动评估一次限流的请求参数
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub scope: Scope,
    #[serde(default)]
    pub id: String,
    pub rule_id: String,
    /// 不传时使用服务默认规则
    pub rule: Option<RuleRequest>,
}

// 未校验的规则参数，策略名称按字符串接收，校验失败返回 400
#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    pub max_requests: u32,
    pub window_ms: i64,
    pub strategy: String,
}

impl RuleRequest {
    pub fn into_rule(self) -> Result<RateLimitRule, ConfigError> {
        let strategy = get_strategy(&self.strategy)?;
        RateLimitRule::new(self.max_requests, self.window_ms, strategy.kind())
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub key: String,
    #[serde(flatten)]
    pub decision: Decision,
    pub retry_after_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    #[serde(flatten)]
    pub record: RateLimitRecord,
    pub ttl_ms: u64,
}

impl RecordResponse {
    pub fn new(record: RateLimitRecord, now: Millis) -> Self {
        let ttl_ms = (record.expires_at - now).max(0) as u64;
        Self { record, ttl_ms }
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub key: String,
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub cache: &'static str,
    pub cache_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStats>,
    pub cleanup_running: bool,
    pub default_rule: RateLimitRule,
}
