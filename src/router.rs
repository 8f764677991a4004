use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    middleware::{RateLimiter, rate_limit},
    routes,
};

/// 中间件使用的规则标识
pub const HTTP_RULE_ID: &str = "http";

// 限流管理相关的路由
pub fn rate_limit_routes() -> Router<AppState> {
    Router::new()
        .route("/rate-limits/check", post(routes::rate_limit::check))
        .route("/rate-limits/cleanup", post(routes::rate_limit::run_cleanup))
        .route(
            "/rate-limits/{key}",
            get(routes::rate_limit::get_record).delete(routes::rate_limit::reset_record),
        )
}

// 创建主路由，健康检查不受限流影响
pub fn create_router(state: AppState) -> Router {
    let limiter = Arc::new(RateLimiter::new(
        state.service.clone(),
        state.rule,
        HTTP_RULE_ID,
    ));

    let limited = rate_limit_routes().layer(axum::middleware::from_fn_with_state(
        limiter, rate_limit,
    ));

    Router::new()
        .route("/health", get(routes::rate_limit::health))
        .merge(limited)
        .with_state(state)
}
