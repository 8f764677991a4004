//! 限流策略
//!
//! 三种算法都是纯函数：输入当前记录、规则和时间，输出决策和新记录。
//! 策略本身不保存任何状态，新记录由调用方负责持久化。

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

use crate::error::ConfigError;
use crate::rate_limit::{Decision, Millis, RateLimitRecord, RateLimitRule, StrategyKind};

/// 单次评估的输出
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub record: RateLimitRecord,
}

/// 限流策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::FixedWindow => StrategyKind::FixedWindow,
            Strategy::SlidingWindow => StrategyKind::SlidingWindow,
            Strategy::TokenBucket => StrategyKind::TokenBucket,
        }
    }

    /// 评估一次请求
    ///
    /// 记录的状态类型与本策略不一致时（规则被改过算法），按无记录处理。
    pub fn evaluate(
        &self,
        key: &str,
        rule: &RateLimitRule,
        record: Option<&RateLimitRecord>,
        now: Millis,
    ) -> Evaluation {
        let state = record
            .map(|r| &r.state)
            .filter(|state| state.kind() == self.kind());

        match self {
            Strategy::FixedWindow => fixed_window::evaluate(key, rule, state, now),
            Strategy::SlidingWindow => sliding_window::evaluate(key, rule, state, now),
            Strategy::TokenBucket => token_bucket::evaluate(key, rule, state, now),
        }
    }
}

impl From<StrategyKind> for Strategy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::FixedWindow => Strategy::FixedWindow,
            StrategyKind::SlidingWindow => Strategy::SlidingWindow,
            StrategyKind::TokenBucket => Strategy::TokenBucket,
        }
    }
}

/// 按名称查找策略，未知名称直接返回配置错误
pub fn get_strategy(name: &str) -> Result<Strategy, ConfigError> {
    name.parse::<StrategyKind>().map(Strategy::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RecordState;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(get_strategy("fixed-window").unwrap(), Strategy::FixedWindow);
        assert_eq!(get_strategy("sliding-window").unwrap(), Strategy::SlidingWindow);
        assert_eq!(get_strategy("token-bucket").unwrap(), Strategy::TokenBucket);
    }

    #[test]
    fn test_registry_unknown_name_fails_fast() {
        let err = get_strategy("leaky-bucket").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStrategy(_)));
        assert!(get_strategy("").is_err());
    }

    #[test]
    fn test_mismatched_record_is_ignored() {
        let rule = RateLimitRule::new(2, 1000, StrategyKind::FixedWindow).unwrap();
        let bucket = RateLimitRecord {
            key: "k".into(),
            state: RecordState::TokenBucket {
                tokens: 0.0,
                last_refill_at: 0,
            },
            expires_at: 1000,
        };

        let eval = Strategy::FixedWindow.evaluate("k", &rule, Some(&bucket), 10);
        assert!(eval.decision.allowed());
        assert_eq!(
            eval.record.state,
            RecordState::FixedWindow {
                window_start: 10,
                count: 1
            }
        );
    }
}
