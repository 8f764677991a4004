use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::rate_limit::RateLimitRecord;

/// 默认容量
pub const DEFAULT_LRU_CAPACITY: usize = 10_000;

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheEntry {
    record: RateLimitRecord,
    deadline: Instant,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, CacheEntry>,
    /// 访问顺序，tick 越小越久未使用
    order: BTreeMap<u64, String>,
    next_tick: u64,
    stats: CacheStats,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }
}

/// 本地 LRU 缓存
///
/// 容量满时驱逐最久未使用的条目；每个条目另有独立的 TTL，
/// 过期条目即使还没被驱逐也按未命中处理。
pub struct MemoryLruCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl MemoryLruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<RateLimitRecord> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Instant::now();

        let (expired, old_tick) = match state.entries.get(key) {
            Some(entry) => (entry.deadline <= now, entry.tick),
            None => {
                state.stats.misses += 1;
                return None;
            }
        };

        if expired {
            state.remove(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            debug!("Expired entry removed from LRU cache: {}", key);
            return None;
        }

        let tick = state.next_tick();
        state.order.remove(&old_tick);
        state.order.insert(tick, key.to_string());

        let entry = state.entries.get_mut(key)?;
        entry.tick = tick;
        let record = entry.record.clone();
        state.stats.hits += 1;
        Some(record)
    }

    pub async fn set(&self, key: &str, record: RateLimitRecord, ttl_ms: u64) {
        let mut state = self.state.lock().await;
        state.remove(key);

        if ttl_ms == 0 {
            return;
        }

        let tick = state.next_tick();
        let deadline = Instant::now() + Duration::from_millis(ttl_ms);
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                record,
                deadline,
                tick,
            },
        );
        state.order.insert(tick, key.to_string());

        while state.entries.len() > self.capacity {
            let Some((_, evicted)) = state.order.pop_first() else {
                break;
            };
            state.entries.remove(&evicted);
            state.stats.evictions += 1;
            debug!("Evicted least recently used key from LRU cache: {}", evicted);
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        state.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats.clone()
    }
}

impl Default for MemoryLruCache {
    fn default() -> Self {
        Self::new(DEFAULT_LRU_CAPACITY)
    }
}
