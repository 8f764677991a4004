use std::env;
use std::str::FromStr;

use crate::cache::{CacheMode, DEFAULT_LRU_CAPACITY};
use crate::cleanup::{CleanupConfig, DEFAULT_CLEANUP_INTERVAL_MS};
use crate::error::ConfigError;
use crate::rate_limit::{RateLimitRule, StrategyKind};
use crate::service::FailurePolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// 未配置时使用进程内存储
    pub database_url: Option<String>,
    /// 未配置或不可用时使用本地 LRU 缓存
    pub redis_url: Option<String>,
    pub cache_mode: CacheMode,
    pub lru_capacity: usize,
    pub server_host: String,
    pub server_port: u16,
    pub rate_limit_requests: u32,
    pub rate_limit_window_ms: i64,
    pub rate_limit_strategy: StrategyKind,
    pub failure_policy: FailurePolicy,
    pub cleanup_interval_ms: u64,
    pub cleanup_debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            cache_mode: CacheMode::Auto,
            lru_capacity: DEFAULT_LRU_CAPACITY,
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            rate_limit_requests: 100,
            rate_limit_window_ms: 60_000,
            rate_limit_strategy: StrategyKind::FixedWindow,
            failure_policy: FailurePolicy::Open,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            cleanup_debug: false,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::InvalidValue { name, value })
        }
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        Ok(Config {
            database_url: optional_var("DATABASE_URL"),
            redis_url: optional_var("REDIS_URL"),
            cache_mode: optional_var("RATE_LIMIT_CACHE")
                .map(|value| value.parse())
                .transpose()?
                .unwrap_or_default(),
            lru_capacity: parse_var("LRU_CAPACITY", defaults.lru_capacity)?,
            server_host: optional_var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_var("SERVER_PORT", defaults.server_port)?,
            rate_limit_requests: parse_var("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window_ms: parse_var("RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms)?,
            rate_limit_strategy: optional_var("RATE_LIMIT_STRATEGY")
                .map(|value| value.parse())
                .transpose()?
                .unwrap_or(defaults.rate_limit_strategy),
            failure_policy: optional_var("RATE_LIMIT_FAILURE_POLICY")
                .map(|value| value.parse())
                .transpose()?
                .unwrap_or_default(),
            cleanup_interval_ms: parse_var("CLEANUP_INTERVAL_MS", defaults.cleanup_interval_ms)?,
            cleanup_debug: parse_var("CLEANUP_DEBUG", defaults.cleanup_debug)?,
        })
    }

    /// 由配置得出的默认限流规则，启动时校验一次
    pub fn default_rule(&self) -> Result<RateLimitRule, ConfigError> {
        RateLimitRule::new(
            self.rate_limit_requests,
            self.rate_limit_window_ms,
            self.rate_limit_strategy,
        )
    }

    pub fn cleanup(&self) -> CleanupConfig {
        CleanupConfig {
            interval_ms: self.cleanup_interval_ms,
            debug: self.cleanup_debug,
        }
    }
}
