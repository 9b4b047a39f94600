//! TimescaleDB 스토리지 구현.
//!
//! PostgreSQL(+ TimescaleDB 확장)에 원시 샘플, 캔들, 추적 자산을 저장합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ohlcv_core::{
    Candle, DatabaseSettings, Initialization, Measurement, SamplePoint, Timeframe, TrackedAsset,
};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{AssetDirectory, CandleStore, RunLease, RunLock, SampleStore};
use crate::error::{DataError, Result};

/// UNNEST 일괄 삽입 청크 크기.
const CHUNK_SIZE: usize = 500;

/// 백필 단일 실행용 advisory lock 키 ("OHLC").
const BACKFILL_LOCK_KEY: i64 = 0x4F48_4C43;

const ASSET_COLUMNS: &str = "asset_id, symbol, venue_id, is_active, \
     initialization_status, initialization_progress, initialization_error";

/// 데이터베이스 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 새로운 데이터베이스 연결 풀을 생성합니다.
    pub async fn connect(config: &DatabaseSettings) -> Result<Self> {
        info!("데이터베이스 연결 중...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("데이터베이스 연결 완료");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 데이터베이스 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> Result<()> {
        info!("마이그레이션 실행 중...");

        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DataError::MigrationError(e.to_string()))?;

        info!("마이그레이션 완료");
        Ok(())
    }

    /// 데이터베이스 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;
        Ok(true)
    }
}

/// 캔들 데이터베이스 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct CandleRecord {
    pub asset_id: String,
    pub timeframe: String,
    pub period_end: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quality_factor: f64,
    pub rsi: Option<Decimal>,
    pub rsi_quality: f64,
    pub ema: Option<Decimal>,
}

impl CandleRecord {
    /// 도메인 캔들로 변환합니다. 값 범위는 다시 클램프됩니다.
    pub fn into_candle(self) -> Result<Candle> {
        let timeframe: Timeframe = self
            .timeframe
            .parse()
            .map_err(DataError::InvalidData)?;

        let mut candle = Candle::shell(
            self.asset_id,
            timeframe,
            self.period_end,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.quality_factor,
        );
        candle.set_indicators(self.rsi, self.rsi_quality, self.ema);
        Ok(candle)
    }
}

/// 추적 자산 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRecord {
    pub asset_id: String,
    pub symbol: String,
    pub venue_id: Option<String>,
    pub is_active: bool,
    pub initialization_status: String,
    pub initialization_progress: i16,
    pub initialization_error: Option<String>,
}

impl TryFrom<AssetRecord> for TrackedAsset {
    type Error = DataError;

    fn try_from(r: AssetRecord) -> Result<Self> {
        let status = r
            .initialization_status
            .parse()
            .map_err(DataError::InvalidData)?;

        Ok(TrackedAsset {
            asset_id: r.asset_id,
            symbol: r.symbol,
            venue_id: r.venue_id,
            is_active: r.is_active,
            initialization: Initialization {
                status,
                progress: r.initialization_progress.clamp(0, 100) as u8,
                error: r.initialization_error,
            },
        })
    }
}

/// 샘플/캔들/자산 저장소.
#[derive(Clone)]
pub struct TimescaleStore {
    db: Database,
}

impl TimescaleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }
}

#[async_trait]
impl SampleStore for TimescaleStore {
    #[instrument(skip(self, points), fields(count = points.len()))]
    async fn write_samples(
        &self,
        measurement: Measurement,
        asset_id: &str,
        points: &[SamplePoint],
    ) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;

        for chunk in points.chunks(CHUNK_SIZE) {
            let timestamps: Vec<DateTime<Utc>> = chunk.iter().map(|p| p.timestamp).collect();
            let values: Vec<Decimal> = chunk.iter().map(|p| p.value).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO raw_samples (measurement, asset_id, ts, value)
                SELECT $1::text, $2::text, * FROM UNNEST($3::timestamptz[], $4::numeric[])
                ON CONFLICT (measurement, asset_id, ts) DO NOTHING
                "#,
            )
            .bind(measurement.as_str())
            .bind(asset_id)
            .bind(&timestamps)
            .bind(&values)
            .execute(self.pool())
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

            inserted += result.rows_affected() as usize;
        }

        debug!(
            asset = asset_id,
            measurement = %measurement,
            inserted,
            skipped = points.len() - inserted,
            "원시 샘플 저장"
        );

        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn query_samples(
        &self,
        measurement: Measurement,
        asset_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SamplePoint>> {
        let rows: Vec<(DateTime<Utc>, Decimal)> = sqlx::query_as(
            r#"
            SELECT ts, value FROM raw_samples
            WHERE measurement = $1 AND asset_id = $2 AND ts >= $3 AND ts <= $4
            ORDER BY ts ASC
            "#,
        )
        .bind(measurement.as_str())
        .bind(asset_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ts, value)| SamplePoint::new(ts, value))
            .collect())
    }
}

#[async_trait]
impl CandleStore for TimescaleStore {
    #[instrument(skip(self, candles), fields(count = candles.len()))]
    async fn write_candles(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut written = 0;

        for chunk in candles.chunks(CHUNK_SIZE) {
            let asset_ids: Vec<&str> = chunk.iter().map(|c| c.asset_id.as_str()).collect();
            let timeframes: Vec<&str> = chunk.iter().map(|c| c.timeframe.as_str()).collect();
            let period_ends: Vec<DateTime<Utc>> = chunk.iter().map(|c| c.period_end).collect();
            let opens: Vec<Decimal> = chunk.iter().map(|c| c.open).collect();
            let highs: Vec<Decimal> = chunk.iter().map(|c| c.high).collect();
            let lows: Vec<Decimal> = chunk.iter().map(|c| c.low).collect();
            let closes: Vec<Decimal> = chunk.iter().map(|c| c.close).collect();
            let volumes: Vec<Decimal> = chunk.iter().map(|c| c.volume).collect();
            let qualities: Vec<f64> = chunk.iter().map(|c| c.quality_factor).collect();
            let rsis: Vec<Option<Decimal>> = chunk.iter().map(|c| c.rsi).collect();
            let rsi_qualities: Vec<f64> = chunk.iter().map(|c| c.rsi_quality).collect();
            let emas: Vec<Option<Decimal>> = chunk.iter().map(|c| c.ema).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO candles
                    (asset_id, timeframe, period_end, open, high, low, close, volume,
                     quality_factor, rsi, rsi_quality, ema, updated_at)
                SELECT *, NOW() FROM UNNEST(
                    $1::text[], $2::text[], $3::timestamptz[],
                    $4::numeric[], $5::numeric[], $6::numeric[], $7::numeric[], $8::numeric[],
                    $9::float8[], $10::numeric[], $11::float8[], $12::numeric[]
                )
                ON CONFLICT (asset_id, timeframe, period_end) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    quality_factor = EXCLUDED.quality_factor,
                    rsi = EXCLUDED.rsi,
                    rsi_quality = EXCLUDED.rsi_quality,
                    ema = EXCLUDED.ema,
                    updated_at = NOW()
                "#,
            )
            .bind(&asset_ids)
            .bind(&timeframes)
            .bind(&period_ends)
            .bind(&opens)
            .bind(&highs)
            .bind(&lows)
            .bind(&closes)
            .bind(&volumes)
            .bind(&qualities)
            .bind(&rsis)
            .bind(&rsi_qualities)
            .bind(&emas)
            .execute(self.pool())
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

            written += result.rows_affected() as usize;
        }

        debug!(written, "캔들 저장");
        Ok(written)
    }

    #[instrument(skip(self))]
    async fn query_candle(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Candle>> {
        let record: Option<CandleRecord> = sqlx::query_as(
            r#"
            SELECT asset_id, timeframe, period_end, open, high, low, close, volume,
                   quality_factor, rsi, rsi_quality, ema
            FROM candles
            WHERE asset_id = $1 AND timeframe = $2 AND period_end = $3
            "#,
        )
        .bind(asset_id)
        .bind(timeframe.as_str())
        .bind(period_end)
        .fetch_optional(self.pool())
        .await?;

        record.map(CandleRecord::into_candle).transpose()
    }

    #[instrument(skip(self))]
    async fn query_candles(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let records: Vec<CandleRecord> = sqlx::query_as(
            r#"
            SELECT asset_id, timeframe, period_end, open, high, low, close, volume,
                   quality_factor, rsi, rsi_quality, ema
            FROM candles
            WHERE asset_id = $1 AND timeframe = $2 AND period_end >= $3 AND period_end <= $4
            ORDER BY period_end ASC
            "#,
        )
        .bind(asset_id)
        .bind(timeframe.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;

        records.into_iter().map(CandleRecord::into_candle).collect()
    }
}

#[async_trait]
impl AssetDirectory for TimescaleStore {
    #[instrument(skip(self))]
    async fn list_active_assets(&self) -> Result<Vec<TrackedAsset>> {
        let records: Vec<AssetRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM tracked_assets WHERE is_active ORDER BY asset_id",
            ASSET_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;

        records.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_asset(&self, asset_id: &str) -> Result<Option<TrackedAsset>> {
        let record: Option<AssetRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM tracked_assets WHERE asset_id = $1",
            ASSET_COLUMNS
        ))
        .bind(asset_id)
        .fetch_optional(self.pool())
        .await?;

        record.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn set_venue_id(&self, asset_id: &str, venue_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE tracked_assets SET venue_id = $2 WHERE asset_id = $1")
            .bind(asset_id)
            .bind(venue_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            warn!(asset = asset_id, "venue_id 캐시 대상 자산 없음");
            return Err(DataError::NotFound(format!("asset {}", asset_id)));
        }
        Ok(())
    }

    async fn next_pending(&self) -> Result<Option<TrackedAsset>> {
        let record: Option<AssetRecord> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM tracked_assets
            WHERE initialization_status = 'pending'
            ORDER BY created_at, asset_id
            LIMIT 1
            "#,
            ASSET_COLUMNS
        ))
        .fetch_optional(self.pool())
        .await?;

        record.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn set_initialization(&self, asset_id: &str, state: &Initialization) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_assets SET
                initialization_status = $2,
                initialization_progress = $3,
                initialization_error = $4,
                initialization_updated_at = NOW()
            WHERE asset_id = $1
            "#,
        )
        .bind(asset_id)
        .bind(state.status.as_str())
        .bind(i16::from(state.progress))
        .bind(state.error.as_deref())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("asset {}", asset_id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn activate(&self, asset_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE tracked_assets SET is_active = TRUE WHERE asset_id = $1")
            .bind(asset_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("asset {}", asset_id)));
        }
        Ok(())
    }
}

/// 세션 단위 advisory lock을 잡고 있는 연결.
///
/// 잠금은 연결(세션)에 묶여 있으므로 해제 전까지 연결을 풀에 돌려주지 않습니다.
struct PgLease {
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl RunLease for PgLease {
    async fn release(mut self: Box<Self>) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let unlocked: std::result::Result<(bool,), sqlx::Error> =
            sqlx::query_as("SELECT pg_advisory_unlock($1)")
                .bind(BACKFILL_LOCK_KEY)
                .fetch_one(&mut *conn)
                .await;

        match unlocked {
            Ok((released,)) => {
                if !released {
                    warn!("백필 잠금이 이미 해제되어 있음");
                }
                Ok(())
            }
            Err(e) => {
                // 잠금을 쥔 연결이 풀로 돌아가지 않도록 닫음
                drop(conn.detach());
                Err(e.into())
            }
        }
    }
}

impl Drop for PgLease {
    fn drop(&mut self) {
        // 해제하지 못한 경우 연결을 닫아 세션과 함께 잠금을 풀어버립니다
        if let Some(conn) = self.conn.take() {
            warn!("백필 잠금을 해제하지 않고 종료, 연결을 닫습니다");
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl RunLock for TimescaleStore {
    #[instrument(skip(self))]
    async fn try_lock(&self) -> Result<Option<Box<dyn RunLease>>> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(BACKFILL_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            debug!("다른 프로세스가 백필 잠금을 보유 중");
            return Ok(None);
        }
        Ok(Some(Box::new(PgLease { conn: Some(conn) })))
    }

    async fn is_locked(&self) -> Result<bool> {
        let (locked,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_locks
                WHERE locktype = 'advisory'
                  AND granted
                  AND database = (SELECT oid FROM pg_database WHERE datname = current_database())
                  AND ((classid::bigint << 32) | objid::bigint) = $1
                  AND objsubid = 1
            )
            "#,
        )
        .bind(BACKFILL_LOCK_KEY)
        .fetch_one(self.pool())
        .await?;

        Ok(locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record(timeframe: &str) -> CandleRecord {
        CandleRecord {
            asset_id: "a".to_string(),
            timeframe: timeframe.to_string(),
            period_end: Utc.with_ymd_and_hms(2025, 10, 21, 4, 0, 0).unwrap(),
            open: dec!(1),
            high: dec!(2),
            low: dec!(0.5),
            close: dec!(1.5),
            volume: Decimal::ZERO,
            quality_factor: 0.75,
            rsi: Some(dec!(61.2)),
            rsi_quality: 0.4,
            ema: Some(dec!(1.3)),
        }
    }

    #[test]
    fn test_record_into_candle() {
        let candle = record("4h").into_candle().unwrap();
        assert_eq!(candle.timeframe, Timeframe::H4);
        assert_eq!(candle.rsi, Some(dec!(61.2)));
        assert_eq!(candle.rsi_quality, 0.4);
        assert_eq!(candle.quality_factor, 0.75);
    }

    fn asset_record(status: &str, progress: i16) -> AssetRecord {
        AssetRecord {
            asset_id: "Mint".to_string(),
            symbol: "NEW".to_string(),
            venue_id: None,
            is_active: false,
            initialization_status: status.to_string(),
            initialization_progress: progress,
            initialization_error: None,
        }
    }

    #[test]
    fn test_asset_record_conversion() {
        let asset = TrackedAsset::try_from(asset_record("in_progress", 42)).unwrap();
        assert_eq!(asset.initialization, Initialization::in_progress(42));
        assert!(!asset.is_active);

        let clamped = TrackedAsset::try_from(asset_record("completed", 300)).unwrap();
        assert_eq!(clamped.initialization.progress, 100);

        assert!(matches!(
            TrackedAsset::try_from(asset_record("queued", 0)),
            Err(DataError::InvalidData(_))
        ));
    }

    #[test]
    fn test_record_with_unknown_timeframe() {
        assert!(matches!(
            record("2h").into_candle(),
            Err(DataError::InvalidData(_))
        ));
    }
}
