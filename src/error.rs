use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::utils::error_codes;

/// 配置错误，在规则装配阶段即失败
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown rate limit strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid rate limit rule: {0}")]
    InvalidRule(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// 缓存错误，只在缓存层内部流转，对外表现为未命中
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 持久化存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt rate limit record for {0}")]
    CorruptRecord(String),
}

/// 限流评估错误
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    RateLimit(RateLimitError),
    Store(StoreError),
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        AppError::RateLimit(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    error_message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::NotFound(key) => (
                StatusCode::NOT_FOUND,
                error_codes::NOT_FOUND,
                format!("No rate limit record for {}", key),
            ),
            AppError::RateLimit(RateLimitError::Config(err)) => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                err.to_string(),
            ),
            AppError::RateLimit(RateLimitError::Store(err)) | AppError::Store(err) => {
                tracing::error!("Rate limit store failure: {}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    error_codes::STORE_UNAVAILABLE,
                    "Rate limit store unavailable".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code,
            error_message,
        });

        (status, body).into_response()
    }
}
