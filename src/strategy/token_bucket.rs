//! 令牌桶
//!
//! 容量为 `max_requests`，每个窗口补满一次，首次出现的 key 桶是满的。

use super::Evaluation;
use crate::rate_limit::{Decision, Millis, RateLimitRecord, RateLimitRule, RecordState};

pub(super) fn evaluate(
    key: &str,
    rule: &RateLimitRule,
    state: Option<&RecordState>,
    now: Millis,
) -> Evaluation {
    let capacity = f64::from(rule.max_requests());
    let window_ms = rule.window_ms() as f64;

    let (tokens, last_refill_at) = match state {
        Some(RecordState::TokenBucket {
            tokens,
            last_refill_at,
        }) => (*tokens, *last_refill_at),
        _ => (capacity, now),
    };

    // 时钟回拨时不补充，也不倒退补充时间点
    let elapsed = (now - last_refill_at).max(0) as f64;
    let mut tokens = (tokens + elapsed * capacity / window_ms).clamp(0.0, capacity);
    let last_refill_at = last_refill_at.max(now);

    let limited = tokens < 1.0;
    if !limited {
        tokens -= 1.0;
    }

    let reset_at = if tokens < 1.0 {
        let wait = ((1.0 - tokens) * window_ms / capacity).ceil() as i64;
        now.saturating_add(wait)
    } else {
        now
    };

    Evaluation {
        decision: Decision {
            limited,
            remaining: tokens.floor() as u32,
            reset_at,
            limit: rule.max_requests(),
        },
        record: RateLimitRecord {
            key: key.to_string(),
            state: RecordState::TokenBucket {
                tokens,
                last_refill_at,
            },
            // 一个窗口后必然补满，与没有记录等价
            expires_at: last_refill_at.saturating_add(rule.window_ms()),
        },
    }
}
