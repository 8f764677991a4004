use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    error::{AppError, RateLimitError},
    rate_limit::{RateLimitKey, now_millis},
    result::ApiResponse,
    routes::rate_limit::model::{
        CheckRequest, CheckResponse, CleanupResponse, HealthResponse, RecordResponse,
        ResetResponse,
    },
    utils::success_to_api_response,
};

// 健康检查
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let cache = state.service.cache();
    success_to_api_response(HealthResponse {
        cache: cache.name(),
        cache_healthy: cache.healthcheck().await,
        cache_stats: cache.stats().await,
        cleanup_running: state.cleanup.is_running(),
        default_rule: state.rule,
    })
}

// 查看某个 key 的当前记录
pub async fn get_record(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<RecordResponse>>, AppError> {
    let record = state
        .service
        .peek(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(key.clone()))?;

    Ok(success_to_api_response(RecordResponse::new(
        record,
        now_millis(),
    )))
}

// 清空某个 key 的计数
pub async fn reset_record(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<ResetResponse>>, AppError> {
    let removed = state.service.reset(&key).await?;
    tracing::info!("Rate limit record reset: {} (removed: {})", key, removed);
    Ok(success_to_api_response(ResetResponse { key, removed }))
}

// 手动评估一次限流，会计入计数
pub async fn check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<ApiResponse<CheckResponse>>, AppError> {
    let rule = match req.rule {
        Some(rule) => rule.into_rule().map_err(RateLimitError::from)?,
        None => state.rule,
    };
    let key = RateLimitKey::new(req.scope, req.id, req.rule_id);
    let now = now_millis();

    let decision = state.service.check_at(&key, &rule, now).await?;

    Ok(success_to_api_response(CheckResponse {
        key: key.render(),
        decision,
        retry_after_ms: if decision.limited {
            decision.retry_after_ms(now)
        } else {
            0
        },
    }))
}

// 立即执行一轮过期记录清理
pub async fn run_cleanup(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<CleanupResponse>>, AppError> {
    let removed = state.cleanup.run_now().await?;
    Ok(success_to_api_response(CleanupResponse { removed }))
}
