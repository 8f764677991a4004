//! 过期限流记录清理任务
//!
//! 每个实例对应一个存储，持有自己的定时器，没有全局单例，
//! 因此同一进程里可以同时存在多个互不干扰的清理任务。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::database::RateLimitStore;
use crate::error::StoreError;
use crate::rate_limit::now_millis;

/// 默认清理间隔：5 分钟
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 300_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    pub interval_ms: u64,
    /// 为 true 时每轮清理都以 info 级别输出
    pub debug: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            debug: false,
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

/// 清理任务
pub struct CleanupJob {
    store: Arc<dyn RateLimitStore>,
    config: CleanupConfig,
    running: Mutex<Option<Running>>,
}

impl CleanupJob {
    pub fn new(store: Arc<dyn RateLimitStore>, config: CleanupConfig) -> Self {
        Self {
            store,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 启动定时清理，已经在运行时不做任何事
    ///
    /// 必须在 tokio 运行时内调用。第一次清理在一个间隔之后执行。
    pub fn start(&self) {
        let mut running = self.lock_running();
        if running.is_some() {
            debug!("Rate limit cleanup job already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let verbose = self.config.debug;
        let period = self.config.interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // 发送端被丢弃或收到停止信号
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = run_pass(store.as_ref(), verbose).await {
                            error!("Rate limit cleanup pass failed: {}", e);
                        }
                    }
                }
            }

            debug!("Rate limit cleanup timer stopped");
        });

        info!(
            interval_ms = self.config.interval_ms,
            "Rate limit cleanup job started"
        );
        *running = Some(Running {
            shutdown,
            _handle: handle,
        });
    }

    /// 停止定时器；正在执行的清理会正常完成
    pub fn stop(&self) {
        if let Some(running) = self.lock_running().take() {
            let _ = running.shutdown.send(true);
            info!("Rate limit cleanup job stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// 立即执行一轮清理，与定时器是否运行无关
    pub async fn run_now(&self) -> Result<u64, StoreError> {
        run_pass(self.store.as_ref(), self.config.debug).await
    }
}

async fn run_pass(store: &dyn RateLimitStore, verbose: bool) -> Result<u64, StoreError> {
    let removed = store.delete_expired(now_millis()).await?;
    if verbose {
        info!(removed, "Rate limit cleanup pass finished");
    } else {
        debug!(removed, "Rate limit cleanup pass finished");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::database::MemoryRateLimitStore;
    use crate::rate_limit::{Millis, RateLimitRecord, RateLimitRule, StrategyKind};
    use crate::strategy::Evaluation;

    /// 记录 delete_expired 调用次数，可选地总是失败
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryRateLimitStore,
        passes: AtomicUsize,
        fail: bool,
    }

    impl CountingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn passes(&self) -> usize {
            self.passes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateLimitStore for CountingStore {
        async fn increment(
            &self,
            key: &str,
            rule: &RateLimitRule,
            now: Millis,
        ) -> Result<Evaluation, StoreError> {
            self.inner.increment(key, rule, now).await
        }

        async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn delete_expired(&self, before: Millis) -> Result<u64, StoreError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.delete_expired(before).await
        }
    }

    /// 写入一条在 `expires_at` 过期的记录
    async fn seed(store: &MemoryRateLimitStore, key: &str, expires_at: Millis) {
        let rule = RateLimitRule::new(10, 60_000, StrategyKind::FixedWindow).unwrap();
        store.increment(key, &rule, expires_at - 60_000).await.unwrap();
    }

    fn config(interval_ms: u64) -> CleanupConfig {
        CleanupConfig {
            interval_ms,
            debug: true,
        }
    }

    #[tokio::test]
    async fn test_run_now_removes_only_expired() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let now = now_millis();
        for i in 0..3 {
            seed(&store, &format!("old-{}", i), now - 10_000).await;
        }
        for i in 0..2 {
            seed(&store, &format!("live-{}", i), now + 600_000).await;
        }

        let job = CleanupJob::new(store.clone(), CleanupConfig::default());
        assert_eq!(job.run_now().await.unwrap(), 3);
        assert_eq!(store.len().await, 2);
        assert!(store.get("live-0").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let store = Arc::new(CountingStore::default());
        let job = CleanupJob::new(store.clone(), config(1000));

        job.start();
        job.start();
        assert!(job.is_running());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.passes(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.passes(), 2);
        job.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_pass_waits_one_interval() {
        let store = Arc::new(CountingStore::default());
        let job = CleanupJob::new(store.clone(), config(1000));
        job.start();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(store.passes(), 0);
        job.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_future_passes_but_allows_run_now() {
        let store = Arc::new(CountingStore::default());
        let job = CleanupJob::new(store.clone(), config(1000));

        job.start();
        job.stop();
        assert!(!job.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(store.passes(), 0);

        assert_eq!(job.run_now().await.unwrap(), 0);
        assert_eq!(store.passes(), 1);

        // 可以再次启动
        job.start();
        assert!(job.is_running());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.passes(), 2);
        job.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_keeps_timer_alive() {
        let store = Arc::new(CountingStore::failing());
        let job = CleanupJob::new(store.clone(), config(1000));
        job.start();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(store.passes(), 3);
        assert!(job.is_running());
        assert!(job.run_now().await.is_err());
        job.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_jobs() {
        let first = Arc::new(CountingStore::default());
        let second = Arc::new(CountingStore::default());
        let a = CleanupJob::new(first.clone(), config(1000));
        let b = CleanupJob::new(second.clone(), config(2000));
        a.start();
        b.start();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(first.passes(), 2);
        assert_eq!(second.passes(), 1);

        a.stop();
        assert!(!a.is_running());
        assert!(b.is_running());
    }
}
