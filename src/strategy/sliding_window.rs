//! 滑动窗口（近似）
//!
//! 只保存当前窗口和上一个窗口两个计数，按上一个窗口与滑动区间的重叠比例
//! 估算请求数。窗口按纪元对齐，`elapsed == window_ms` 时即滚动。
//! `remaining` 在放行后计算，已扣除本次请求；被拒绝的请求不计数。

use super::Evaluation;
use crate::rate_limit::{Decision, Millis, RateLimitRecord, RateLimitRule, RecordState};

fn align(now: Millis, window_ms: i64) -> Millis {
    now - now.rem_euclid(window_ms)
}

pub(super) fn evaluate(
    key: &str,
    rule: &RateLimitRule,
    state: Option<&RecordState>,
    now: Millis,
) -> Evaluation {
    let window_ms = rule.window_ms();
    let max = f64::from(rule.max_requests());

    let (mut window_start, mut current, mut previous) = match state {
        Some(RecordState::SlidingWindow {
            current_window_start,
            current_count,
            previous_count,
        }) => (*current_window_start, *current_count, *previous_count),
        _ => (align(now, window_ms), 0, 0),
    };

    let elapsed = now - window_start;
    if elapsed >= window_ms {
        // 跨过两个及以上窗口时，上一个窗口为空
        previous = if elapsed < window_ms.saturating_mul(2) {
            current
        } else {
            0
        };
        current = 0;
        window_start = align(now, window_ms);
    }

    let elapsed_in_current = (now - window_start) as f64;
    let overlap = (1.0 - elapsed_in_current / window_ms as f64).clamp(0.0, 1.0);
    let estimated = current as f64 + previous as f64 * overlap;

    let limited = estimated >= max;
    let estimated_after = if limited {
        estimated
    } else {
        current += 1;
        estimated + 1.0
    };

    let decision = Decision {
        limited,
        remaining: (max - estimated_after).floor().max(0.0) as u32,
        reset_at: window_start.saturating_add(window_ms),
        limit: rule.max_requests(),
    };

    Evaluation {
        decision,
        record: RateLimitRecord {
            key: key.to_string(),
            state: RecordState::SlidingWindow {
                current_window_start: window_start,
                current_count: current,
                previous_count: previous,
            },
            // 上一个窗口的计数在下一个窗口内仍然有效
            expires_at: window_start.saturating_add(window_ms.saturating_mul(2)),
        },
    }
}
