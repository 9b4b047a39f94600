//! 저장소 추상화.
//!
//! - `SampleStore`: 원시 샘플 (추가 전용, 같은 타임스탬프 재기록은 무시)
//! - `CandleStore`: 캔들 (키당 하나, 마지막 기록이 유지)
//! - `AssetDirectory`: 추적 자산 목록 (venue_id 캐시, 신규 자산 초기화 상태만 기록)
//! - `RunLock`: 프로세스 간 백필 단일 실행 잠금
//!
//! 구현체:
//! - `timescale`: PostgreSQL/TimescaleDB
//! - `memory`: 테스트 및 드라이런용 인메모리

pub mod memory;
pub mod timescale;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ohlcv_core::{
    AssetId, Candle, Initialization, Measurement, SamplePoint, Timeframe, TrackedAsset,
};

use crate::error::Result;

/// 원시 샘플 저장소.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// 샘플을 일괄 기록하고 새로 추가된 개수를 반환합니다.
    ///
    /// 이미 존재하는 타임스탬프는 변경하지 않습니다.
    async fn write_samples(
        &self,
        measurement: Measurement,
        asset_id: &str,
        points: &[SamplePoint],
    ) -> Result<usize>;

    /// 샘플 하나를 기록합니다. 새로 추가되었으면 true.
    async fn write_sample(
        &self,
        measurement: Measurement,
        asset_id: &str,
        point: SamplePoint,
    ) -> Result<bool> {
        Ok(self.write_samples(measurement, asset_id, &[point]).await? > 0)
    }

    /// `[from, to]` 구간의 샘플을 오래된 순으로 조회합니다.
    async fn query_samples(
        &self,
        measurement: Measurement,
        asset_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SamplePoint>>;
}

/// 캔들 저장소.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 캔들을 기록합니다. 같은 키가 있으면 덮어씁니다.
    async fn write_candle(&self, candle: &Candle) -> Result<()> {
        self.write_candles(std::slice::from_ref(candle)).await.map(|_| ())
    }

    /// 캔들을 일괄 기록하고 기록한 개수를 반환합니다.
    async fn write_candles(&self, candles: &[Candle]) -> Result<usize>;

    /// 단일 캔들 조회.
    async fn query_candle(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Candle>>;

    /// `period_end ∈ [from, to]` 캔들을 오래된 순으로 조회합니다.
    async fn query_candles(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// 추적 자산 목록.
#[async_trait]
pub trait AssetDirectory: Send + Sync {
    /// 활성 자산 목록.
    async fn list_active_assets(&self) -> Result<Vec<TrackedAsset>>;

    /// 자산 조회 (비활성 포함).
    async fn get_asset(&self, asset_id: &str) -> Result<Option<TrackedAsset>>;

    /// 해석한 주 거래 풀 ID를 캐시합니다.
    async fn set_venue_id(&self, asset_id: &str, venue_id: &str) -> Result<()>;

    /// 초기화 대기 중인 자산 중 가장 먼저 등록된 것.
    async fn next_pending(&self) -> Result<Option<TrackedAsset>>;

    /// 초기화 상태/진행률을 기록합니다.
    async fn set_initialization(&self, asset_id: &str, state: &Initialization) -> Result<()>;

    /// 자산을 활성화합니다. 이후 실시간 수집과 집계 대상이 됩니다.
    async fn activate(&self, asset_id: &str) -> Result<()>;
}

/// 백필 단일 실행 잠금.
///
/// 같은 저장소를 쓰는 모든 프로세스 사이에서 하나의 백필만 실행되도록 합니다.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// 잠금을 시도합니다. 이미 잡혀 있으면 대기하지 않고 `None`.
    async fn try_lock(&self) -> Result<Option<Box<dyn RunLease>>>;

    /// 어느 프로세스든 잠금을 잡고 있는지 확인합니다.
    async fn is_locked(&self) -> Result<bool>;
}

/// 획득한 잠금. `release` 없이 버려져도 잠금은 풀립니다.
#[async_trait]
pub trait RunLease: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// 캔들 키.
pub type CandleKey = (AssetId, Timeframe, DateTime<Utc>);
