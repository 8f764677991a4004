// 限流核心类型
// 规则、记录、决策和 key

pub mod key;
pub mod types;

pub use key::{RateLimitKey, Scope};
pub use types::{
    Decision, Millis, RateLimitRecord, RateLimitRule, RecordState, StrategyKind, now_millis,
};
