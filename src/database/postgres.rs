// 限流记录的 Postgres 存储
// 三种算法的状态共用一张表，按 strategy 列区分字段含义：
//   fixed-window:   window_start, count
//   sliding-window: window_start = 当前窗口起点, count = 当前窗口计数, previous_count
//   token-bucket:   window_start = 上次补充时间, tokens

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::RateLimitStore;
use crate::error::StoreError;
use crate::rate_limit::{Millis, RateLimitRecord, RateLimitRule, RecordState, StrategyKind};
use crate::strategy::{Evaluation, Strategy};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS rate_limits (
        key TEXT PRIMARY KEY,
        strategy TEXT NOT NULL,
        window_start BIGINT NOT NULL,
        count BIGINT NOT NULL DEFAULT 0,
        previous_count BIGINT NOT NULL DEFAULT 0,
        tokens DOUBLE PRECISION NOT NULL DEFAULT 0,
        expires_at BIGINT NOT NULL
    )
"#;

const CREATE_EXPIRES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS rate_limits_expires_at_idx ON rate_limits (expires_at)";

// 先插入一条已过期的占位行，保证后面的 FOR UPDATE 总有行可锁
const INSERT_PLACEHOLDER: &str = r#"
    INSERT INTO rate_limits (key, strategy, window_start, count, previous_count, tokens, expires_at)
    VALUES ($1, $2, $3, 0, 0, 0, $3 - 1)
    ON CONFLICT (key) DO NOTHING
"#;

const SELECT_FOR_UPDATE: &str = r#"
    SELECT key, strategy, window_start, count, previous_count, tokens, expires_at
    FROM rate_limits
    WHERE key = $1
    FOR UPDATE
"#;

const UPSERT_RECORD: &str = r#"
    INSERT INTO rate_limits (key, strategy, window_start, count, previous_count, tokens, expires_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (key) DO UPDATE SET
        strategy = EXCLUDED.strategy,
        window_start = EXCLUDED.window_start,
        count = EXCLUDED.count,
        previous_count = EXCLUDED.previous_count,
        tokens = EXCLUDED.tokens,
        expires_at = EXCLUDED.expires_at
"#;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
struct RateLimitRow {
    key: String,
    strategy: String,
    window_start: i64,
    count: i64,
    previous_count: i64,
    tokens: f64,
    expires_at: i64,
}

fn to_db_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_db_count(key: &str, count: i64) -> Result<u64, StoreError> {
    u64::try_from(count).map_err(|_| StoreError::CorruptRecord(key.to_string()))
}

impl From<&RateLimitRecord> for RateLimitRow {
    fn from(record: &RateLimitRecord) -> Self {
        let (window_start, count, previous_count, tokens) = match record.state {
            RecordState::FixedWindow {
                window_start,
                count,
            } => (window_start, to_db_count(count), 0, 0.0),
            RecordState::SlidingWindow {
                current_window_start,
                current_count,
                previous_count,
            } => (
                current_window_start,
                to_db_count(current_count),
                to_db_count(previous_count),
                0.0,
            ),
            RecordState::TokenBucket {
                tokens,
                last_refill_at,
            } => (last_refill_at, 0, 0, tokens),
        };

        Self {
            key: record.key.clone(),
            strategy: record.state.kind().to_string(),
            window_start,
            count,
            previous_count,
            tokens,
            expires_at: record.expires_at,
        }
    }
}

impl TryFrom<RateLimitRow> for RateLimitRecord {
    type Error = StoreError;

    fn try_from(row: RateLimitRow) -> Result<Self, Self::Error> {
        let kind: StrategyKind = row
            .strategy
            .parse()
            .map_err(|_| StoreError::CorruptRecord(row.key.clone()))?;

        let state = match kind {
            StrategyKind::FixedWindow => RecordState::FixedWindow {
                window_start: row.window_start,
                count: from_db_count(&row.key, row.count)?,
            },
            StrategyKind::SlidingWindow => RecordState::SlidingWindow {
                current_window_start: row.window_start,
                current_count: from_db_count(&row.key, row.count)?,
                previous_count: from_db_count(&row.key, row.previous_count)?,
            },
            StrategyKind::TokenBucket => {
                if !row.tokens.is_finite() || row.tokens < 0.0 {
                    return Err(StoreError::CorruptRecord(row.key));
                }
                RecordState::TokenBucket {
                    tokens: row.tokens,
                    last_refill_at: row.window_start,
                }
            }
        };

        Ok(RateLimitRecord {
            key: row.key,
            state,
            expires_at: row.expires_at,
        })
    }
}

/// Postgres 限流存储
pub struct PgRateLimitStore {
    db: Arc<PgPool>,
}

impl PgRateLimitStore {
    pub fn new(db: Arc<PgPool>) -> Self {
        Self { db }
    }

    /// 建表（已存在则跳过）
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&*self.db).await?;
        sqlx::query(CREATE_EXPIRES_INDEX).execute(&*self.db).await?;
        tracing::debug!("rate_limits table ready");
        Ok(())
    }
}

async fn write_record(conn: &mut PgConnection, record: &RateLimitRecord) -> Result<(), sqlx::Error> {
    let row = RateLimitRow::from(record);
    sqlx::query(UPSERT_RECORD)
        .bind(&row.key)
        .bind(&row.strategy)
        .bind(row.window_start)
        .bind(row.count)
        .bind(row.previous_count)
        .bind(row.tokens)
        .bind(row.expires_at)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    /// 在一个事务内持有行锁完成读-算-写，同一个 key 的评估在各实例间串行执行
    async fn increment(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: Millis,
    ) -> Result<Evaluation, StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(INSERT_PLACEHOLDER)
            .bind(key)
            .bind(rule.strategy().as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, RateLimitRow>(SELECT_FOR_UPDATE)
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to lock rate limit record {}: {:?}", key, e);
                StoreError::from(e)
            })?;

        let current = Some(RateLimitRecord::try_from(row)?).filter(|record| !record.is_expired(now));
        let eval = Strategy::from(rule.strategy()).evaluate(key, rule, current.as_ref(), now);

        write_record(&mut *tx, &eval.record).await?;
        tx.commit().await?;
        Ok(eval)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            SELECT key, strategy, window_start, count, previous_count, tokens, expires_at
            FROM rate_limits
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;

        row.map(RateLimitRecord::try_from).transpose()
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE key = $1")
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, before: Millis) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE expires_at < $1")
            .bind(before)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
