use std::sync::Arc;

use cleanup::CleanupJob;
use config::Config;
use rate_limit::RateLimitRule;
use service::RateLimitService;

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod rate_limit;
pub mod result;
pub mod router;
pub mod routes;
pub mod service;
pub mod strategy;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RateLimitService>,
    pub cleanup: Arc<CleanupJob>,
    pub config: Config,
    /// 默认限流规则
    pub rule: RateLimitRule,
}
