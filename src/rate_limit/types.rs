use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Unix 毫秒时间戳
pub type Millis = i64;

/// 当前墙钟时间（毫秒）
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// 限流算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::FixedWindow,
        StrategyKind::SlidingWindow,
        StrategyKind::TokenBucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FixedWindow => "fixed-window",
            StrategyKind::SlidingWindow => "sliding-window",
            StrategyKind::TokenBucket => "token-bucket",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()))
    }
}

#[derive(Deserialize)]
struct RawRule {
    max_requests: u32,
    window_ms: i64,
    strategy: StrategyKind,
}

/// 限流规则
///
/// 只能通过 [`RateLimitRule::new`] 或反序列化构造，两者都会校验参数，
/// 因此策略拿到的规则总是 `max_requests > 0` 且 `window_ms > 0`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct RateLimitRule {
    max_requests: u32,
    window_ms: i64,
    strategy: StrategyKind,
}

impl RateLimitRule {
    pub fn new(max_requests: u32, window_ms: i64, strategy: StrategyKind) -> Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::InvalidRule(
                "max_requests must be greater than zero".into(),
            ));
        }
        if window_ms <= 0 {
            return Err(ConfigError::InvalidRule(format!(
                "window_ms must be positive, got {}",
                window_ms
            )));
        }
        Ok(Self {
            max_requests,
            window_ms,
            strategy,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }
}

impl TryFrom<RawRule> for RateLimitRule {
    type Error = ConfigError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        RateLimitRule::new(raw.max_requests, raw.window_ms, raw.strategy)
    }
}

/// 各算法的计数器状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum RecordState {
    FixedWindow {
        window_start: Millis,
        count: u64,
    },
    SlidingWindow {
        current_window_start: Millis,
        current_count: u64,
        previous_count: u64,
    },
    TokenBucket {
        tokens: f64,
        last_refill_at: Millis,
    },
}

impl RecordState {
    pub fn kind(&self) -> StrategyKind {
        match self {
            RecordState::FixedWindow { .. } => StrategyKind::FixedWindow,
            RecordState::SlidingWindow { .. } => StrategyKind::SlidingWindow,
            RecordState::TokenBucket { .. } => StrategyKind::TokenBucket,
        }
    }
}

/// 单个 key 的限流记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub key: String,
    pub state: RecordState,
    /// 超过该时间后记录与不存在等价
    pub expires_at: Millis,
}

impl RateLimitRecord {
    pub fn is_expired(&self, now: Millis) -> bool {
        self.expires_at < now
    }

    /// 距离过期的毫秒数，至少为 1
    pub fn ttl_ms(&self, now: Millis) -> u64 {
        (self.expires_at - now).max(1) as u64
    }
}

/// 单次评估的结果，不会被持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub limited: bool,
    pub remaining: u32,
    pub reset_at: Millis,
    pub limit: u32,
}

impl Decision {
    pub fn allowed(&self) -> bool {
        !self.limited
    }

    pub fn retry_after_ms(&self, now: Millis) -> u64 {
        (self.reset_at - now).max(0) as u64
    }
}
