//! 인메모리 저장소.
//!
//! PostgreSQL 구현과 같은 의미를 가지며 테스트와 드라이런에 사용합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ohlcv_core::{
    AssetId, Candle, Initialization, InitializationStatus, Measurement, SamplePoint, Timeframe,
    TrackedAsset,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AssetDirectory, CandleKey, CandleStore, RunLease, RunLock, SampleStore};
use crate::error::{DataError, Result};

type Series = BTreeMap<DateTime<Utc>, Decimal>;

/// 샘플/캔들 인메모리 저장소.
#[derive(Default)]
pub struct MemoryStore {
    samples: RwLock<HashMap<(Measurement, AssetId), Series>>,
    candles: RwLock<BTreeMap<CandleKey, Candle>>,
    candle_writes: AtomicUsize,
    fail_writes: AtomicBool,
    run_lock: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 샘플 수.
    pub async fn sample_count(&self, measurement: Measurement, asset_id: &str) -> usize {
        self.samples
            .read()
            .await
            .get(&(measurement, asset_id.to_string()))
            .map_or(0, BTreeMap::len)
    }

    /// 저장된 캔들 수.
    pub async fn candle_count(&self) -> usize {
        self.candles.read().await.len()
    }

    /// 누적 캔들 기록 횟수 (덮어쓰기 포함).
    pub fn candle_writes(&self) -> usize {
        self.candle_writes.load(Ordering::SeqCst)
    }

    /// 이후 모든 쓰기를 실패시킵니다.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DataError::InsertError("쓰기 비활성화됨".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn write_samples(
        &self,
        measurement: Measurement,
        asset_id: &str,
        points: &[SamplePoint],
    ) -> Result<usize> {
        self.check_writable()?;

        let mut samples = self.samples.write().await;
        let series = samples
            .entry((measurement, asset_id.to_string()))
            .or_default();

        let mut inserted = 0;
        for point in points {
            if let std::collections::btree_map::Entry::Vacant(slot) = series.entry(point.timestamp)
            {
                slot.insert(point.value);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn query_samples(
        &self,
        measurement: Measurement,
        asset_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SamplePoint>> {
        if from > to {
            return Ok(Vec::new());
        }

        let samples = self.samples.read().await;
        Ok(samples
            .get(&(measurement, asset_id.to_string()))
            .map(|series| {
                series
                    .range(from..=to)
                    .map(|(ts, value)| SamplePoint::new(*ts, *value))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn write_candles(&self, candles: &[Candle]) -> Result<usize> {
        self.check_writable()?;

        let mut stored = self.candles.write().await;
        for candle in candles {
            stored.insert(
                (candle.asset_id.clone(), candle.timeframe, candle.period_end),
                candle.clone(),
            );
        }
        self.candle_writes.fetch_add(candles.len(), Ordering::SeqCst);
        Ok(candles.len())
    }

    async fn query_candle(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Candle>> {
        Ok(self
            .candles
            .read()
            .await
            .get(&(asset_id.to_string(), timeframe, period_end))
            .cloned())
    }

    async fn query_candles(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if from > to {
            return Ok(Vec::new());
        }

        let candles = self.candles.read().await;
        let lower = (asset_id.to_string(), timeframe, from);
        let upper = (asset_id.to_string(), timeframe, to);
        Ok(candles.range(lower..=upper).map(|(_, c)| c.clone()).collect())
    }
}

/// 프로세스 내 잠금. 같은 `MemoryStore`를 공유하는 조정자끼리 배타적입니다.
struct MemoryLease(Arc<AtomicBool>);

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[async_trait]
impl RunLease for MemoryLease {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RunLock for MemoryStore {
    async fn try_lock(&self) -> Result<Option<Box<dyn RunLease>>> {
        if self
            .run_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLease(self.run_lock.clone()))))
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.run_lock.load(Ordering::Acquire))
    }
}

/// 추적 자산 인메모리 목록.
///
/// 등록 순서를 기억해 초기화 대기열을 먼저 등록된 자산부터 돌려줍니다.
#[derive(Default)]
pub struct MemoryAssetDirectory {
    assets: RwLock<BTreeMap<AssetId, (u64, TrackedAsset)>>,
    next_seq: AtomicU64,
}

impl MemoryAssetDirectory {
    pub fn new(assets: impl IntoIterator<Item = TrackedAsset>) -> Self {
        let mut directory = Self::default();
        let entries = assets
            .into_iter()
            .map(|a| (a.asset_id.clone(), (directory.seq(), a)))
            .collect();
        directory.assets = RwLock::new(entries);
        directory
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// 자산을 등록하거나 교체합니다. 기존 자산의 등록 순서는 유지됩니다.
    pub async fn upsert(&self, asset: TrackedAsset) {
        let mut assets = self.assets.write().await;
        let seq = match assets.get(&asset.asset_id) {
            Some((seq, _)) => *seq,
            None => self.seq(),
        };
        assets.insert(asset.asset_id.clone(), (seq, asset));
    }

    async fn update(&self, asset_id: &str, apply: impl FnOnce(&mut TrackedAsset)) -> Result<()> {
        let mut assets = self.assets.write().await;
        let (_, asset) = assets
            .get_mut(asset_id)
            .ok_or_else(|| DataError::NotFound(format!("asset {}", asset_id)))?;
        apply(asset);
        Ok(())
    }
}

#[async_trait]
impl AssetDirectory for MemoryAssetDirectory {
    async fn list_active_assets(&self) -> Result<Vec<TrackedAsset>> {
        Ok(self
            .assets
            .read()
            .await
            .values()
            .map(|(_, a)| a)
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    async fn get_asset(&self, asset_id: &str) -> Result<Option<TrackedAsset>> {
        Ok(self.assets.read().await.get(asset_id).map(|(_, a)| a.clone()))
    }

    async fn set_venue_id(&self, asset_id: &str, venue_id: &str) -> Result<()> {
        self.update(asset_id, |a| a.venue_id = Some(venue_id.to_string()))
            .await
    }

    async fn next_pending(&self) -> Result<Option<TrackedAsset>> {
        Ok(self
            .assets
            .read()
            .await
            .values()
            .filter(|(_, a)| a.initialization.status == InitializationStatus::Pending)
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, a)| a.clone()))
    }

    async fn set_initialization(&self, asset_id: &str, state: &Initialization) -> Result<()> {
        self.update(asset_id, |a| a.initialization = state.clone())
            .await
    }

    async fn activate(&self, asset_id: &str) -> Result<()> {
        self.update(asset_id, |a| a.is_active = true).await
    }
}
