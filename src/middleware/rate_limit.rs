use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    rate_limit::{Decision, RateLimitKey, RateLimitRule, now_millis},
    service::{FailurePolicy, RateLimitService},
    utils::{error_codes, error_to_api_response},
};

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// 按客户端 IP 限流的中间件状态
#[derive(Clone)]
pub struct RateLimiter {
    service: Arc<RateLimitService>,
    rule: RateLimitRule,
    rule_id: String,
}

impl RateLimiter {
    pub fn new(service: Arc<RateLimitService>, rule: RateLimitRule, rule_id: impl Into<String>) -> Self {
        Self {
            service,
            rule,
            rule_id: rule_id.into(),
        }
    }

    /// 依次取 x-real-ip、x-forwarded-for 第一个地址、连接地址
    fn client_ip(req: &Request<Body>) -> String {
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        req.headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .filter(|ip| !ip.trim().is_empty())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .or(remote_ip.as_deref())
            .unwrap_or("unknown")
            .trim()
            .to_string()
    }

    pub async fn check_rate_limit(self: Arc<Self>, req: Request<Body>, next: Next) -> Response {
        let ip = Self::client_ip(&req);
        let key = RateLimitKey::ip(&ip, self.rule_id.clone());
        let now = now_millis();

        let decision = match self.service.check_at(&key, &self.rule, now).await {
            Ok(decision) => decision,
            Err(e) => match self.service.policy() {
                FailurePolicy::Open => {
                    tracing::warn!("Rate limit check failed for {}, allowing request: {}", ip, e);
                    return next.run(req).await;
                }
                FailurePolicy::Closed => {
                    tracing::error!("Rate limit check failed for {}, rejecting request: {}", ip, e);
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        error_to_api_response::<()>(
                            error_codes::STORE_UNAVAILABLE,
                            "Rate limiting temporarily unavailable".into(),
                        ),
                    )
                        .into_response();
                }
            },
        };

        if decision.limited {
            tracing::info!("Rate limit exceeded for {} on {}", ip, self.rule_id);
            let retry_after_secs = decision.retry_after_ms(now).div_ceil(1000);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    format!("Too many requests, retry in {} seconds", retry_after_secs),
                ),
            )
                .into_response();
            apply_headers(response.headers_mut(), &decision);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            return response;
        }

        let mut response = next.run(req).await;
        apply_headers(response.headers_mut(), &decision);
        response
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    // 重置时间以 Unix 秒表示
    let reset_secs = (decision.reset_at.max(0) as u64).div_ceil(1000);
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(reset_secs));
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}
