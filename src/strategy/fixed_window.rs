//! 固定窗口
//!
//! 窗口边界两侧各打满一次时，短时间内最多可放行 2 倍 `max_requests`。
//! 这是固定窗口的已知取舍，需要平滑时应使用滑动窗口。

use super::Evaluation;
use crate::rate_limit::{Decision, Millis, RateLimitRecord, RateLimitRule, RecordState};

pub(super) fn evaluate(
    key: &str,
    rule: &RateLimitRule,
    state: Option<&RecordState>,
    now: Millis,
) -> Evaluation {
    let (window_start, count) = match state {
        Some(RecordState::FixedWindow {
            window_start,
            count,
        }) if now - *window_start < rule.window_ms() => (*window_start, count.saturating_add(1)),
        _ => (now, 1),
    };

    Evaluation {
        decision: decide(rule, window_start, count),
        record: RateLimitRecord {
            key: key.to_string(),
            state: RecordState::FixedWindow {
                window_start,
                count,
            },
            expires_at: window_start.saturating_add(rule.window_ms()),
        },
    }
}

/// 根据已经计入本次请求的计数得出决策
fn decide(rule: &RateLimitRule, window_start: Millis, count: u64) -> Decision {
    let max = u64::from(rule.max_requests());
    Decision {
        limited: count > max,
        remaining: max.saturating_sub(count) as u32,
        reset_at: window_start.saturating_add(rule.window_ms()),
        limit: rule.max_requests(),
    }
}
