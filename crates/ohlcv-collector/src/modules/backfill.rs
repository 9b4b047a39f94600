//! 2단계 백필.
//!
//! 1단계 (샘플 보충): 히스토리 소스의 분봉 종가를 저장소에 없는 시각에만 원시 샘플로 추가
//! 2단계 (선택적 재계산): 타임프레임마다 기간 경계를 열거하고, 캔들이 없거나
//! 품질(`quality_factor`, `rsi_quality`)이 임계값 미만인 기간만 다시 만듭니다.
//!
//! 한 번에 하나의 백필만 실행됩니다. 실행 중 호출은 대기하지 않고 즉시 거절됩니다.
//! 프로세스 안에서는 플래그로, 같은 저장소를 쓰는 프로세스 사이에서는 `RunLock`으로 막습니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ohlcv_core::{
    BackfillResult, BackfillStatus, BackfillSummary, BackfillWindow, Candle, HistoryBar,
    Measurement, PipelineError, PipelineResult, SamplePoint, Timeframe, TimeframeStats,
    TrackedAsset,
};
use ohlcv_data::{
    AssetDirectory, CandleStore, DataError, FetchProgress, RateLimitedHistoryFetcher, RunLease,
    RunLock, SampleStore,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, instrument, warn};

use super::aggregator::{CandleAggregator, SampleIndex};
use crate::config::BackfillConfig;

/// 실행 중 플래그와 저장소 잠금을 잡고 있는 동안 유지되는 가드.
///
/// 버려지면 플래그가 풀리고, 잠금은 `RunLease`의 drop 동작으로 풀립니다.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
    lease: Option<Box<dyn RunLease>>,
}

impl RunGuard<'_> {
    async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = lease.release().await {
                warn!(error = %e, "백필 잠금 해제 실패");
            }
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// 1단계가 끝난 뒤 2단계에 넘기는 인메모리 샘플.
struct LoadedSamples {
    prices: SampleIndex,
    volumes: Option<SampleIndex>,
}

/// 백필 조정자.
pub struct BackfillOrchestrator {
    aggregator: Arc<CandleAggregator>,
    samples: Arc<dyn SampleStore>,
    candles: Arc<dyn CandleStore>,
    assets: Arc<dyn AssetDirectory>,
    lock: Arc<dyn RunLock>,
    fetcher: Arc<RateLimitedHistoryFetcher>,
    config: BackfillConfig,
    running: AtomicBool,
    progress: Option<UnboundedSender<FetchProgress>>,
}

impl BackfillOrchestrator {
    pub fn new(
        aggregator: Arc<CandleAggregator>,
        samples: Arc<dyn SampleStore>,
        candles: Arc<dyn CandleStore>,
        assets: Arc<dyn AssetDirectory>,
        lock: Arc<dyn RunLock>,
        fetcher: Arc<RateLimitedHistoryFetcher>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            aggregator,
            samples,
            candles,
            assets,
            lock,
            fetcher,
            config,
            running: AtomicBool::new(false),
            progress: None,
        }
    }

    /// 히스토리 수집 진행 상황을 받을 채널을 연결합니다.
    pub fn with_progress(mut self, sink: UnboundedSender<FetchProgress>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// 현재 실행 여부와 품질 임계값.
    ///
    /// 다른 프로세스가 잠금을 잡고 있어도 실행 중으로 봅니다.
    pub async fn status(&self) -> BackfillStatus {
        let is_running = self.running.load(Ordering::Acquire)
            || match self.lock.is_locked().await {
                Ok(locked) => locked,
                Err(e) => {
                    warn!(error = %e, "백필 잠금 상태 조회 실패");
                    false
                }
            };

        BackfillStatus {
            is_running,
            quality_threshold: self.config.quality_threshold,
        }
    }

    async fn acquire(&self) -> PipelineResult<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::Concurrency)?;
        let mut guard = RunGuard {
            flag: &self.running,
            lease: None,
        };

        match self.lock.try_lock().await? {
            Some(lease) => {
                guard.lease = Some(lease);
                Ok(guard)
            }
            None => Err(PipelineError::Concurrency),
        }
    }

    /// 단일 자산 백필.
    ///
    /// 구간 오류, 알 수 없는(또는 비활성) 자산, 동시 실행은 `Err`로 거절합니다.
    /// 실행이 시작된 뒤의 실패는 `success: false`인 결과로 돌려주며,
    /// 그때까지의 진행 상황이 남아 있습니다.
    #[instrument(skip(self))]
    pub async fn run_backfill(
        &self,
        asset_id: &str,
        window: BackfillWindow,
    ) -> PipelineResult<BackfillResult> {
        self.run_single(asset_id, window, true, None).await
    }

    /// 아직 활성화되지 않은 신규 자산의 히스토리 적재.
    ///
    /// 활성 여부를 보지 않는 것 외에는 `run_backfill`과 같습니다.
    /// 히스토리 수집 진행 상황은 `progress`로도 전달되며, 실행이 끝나면 송신측이 닫힙니다.
    #[instrument(skip(self, progress))]
    pub async fn run_initial_load(
        &self,
        asset_id: &str,
        window: BackfillWindow,
        progress: Option<UnboundedSender<FetchProgress>>,
    ) -> PipelineResult<BackfillResult> {
        self.run_single(asset_id, window, false, progress).await
    }

    async fn run_single(
        &self,
        asset_id: &str,
        window: BackfillWindow,
        require_active: bool,
        progress: Option<UnboundedSender<FetchProgress>>,
    ) -> PipelineResult<BackfillResult> {
        window.validate()?;
        let guard = self.acquire().await?;

        let outcome = match self.assets.get_asset(asset_id).await {
            Ok(Some(asset)) if asset.is_active || !require_active => {
                Ok(self.backfill_asset(&asset, window, progress.as_ref()).await)
            }
            Ok(_) => Err(PipelineError::NotFound(format!(
                "추적 중인 자산이 아님: {}",
                asset_id
            ))),
            Err(e) => Err(e.into()),
        };

        guard.release().await;
        outcome
    }

    /// 모든 활성 자산 백필. 한 자산의 실패는 그 자산의 결과에만 기록됩니다.
    #[instrument(skip(self))]
    pub async fn run_backfill_all(&self, window: BackfillWindow) -> PipelineResult<BackfillSummary> {
        window.validate()?;
        let guard = self.acquire().await?;
        let outcome = self.backfill_all_locked(window).await;
        guard.release().await;
        outcome
    }

    async fn backfill_all_locked(&self, window: BackfillWindow) -> PipelineResult<BackfillSummary> {
        let assets = self.assets.list_active_assets().await?;
        info!(assets = assets.len(), "전체 자산 백필 시작");

        let mut results = Vec::with_capacity(assets.len());
        for asset in &assets {
            results.push(self.backfill_asset(asset, window, None).await);
        }

        let summary = BackfillSummary::from_results(window, results);
        info!(
            total = summary.total_assets,
            successful = summary.successful,
            failed = summary.failed,
            "전체 자산 백필 완료"
        );
        Ok(summary)
    }

    async fn backfill_asset(
        &self,
        asset: &TrackedAsset,
        window: BackfillWindow,
        progress: Option<&UnboundedSender<FetchProgress>>,
    ) -> BackfillResult {
        let started = Instant::now();
        let mut result = BackfillResult::new(asset.asset_id.clone(), window);
        result.symbol = Some(asset.symbol.clone());

        info!(
            asset = %asset.asset_id,
            symbol = %asset.symbol,
            start = %window.start.to_rfc3339(),
            end = %window.end.to_rfc3339(),
            "백필 시작"
        );

        if let Err(e) = self.execute(asset, window, progress, &mut result).await {
            result.fail(&e);
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result.log_summary();
        result
    }

    async fn execute(
        &self,
        asset: &TrackedAsset,
        window: BackfillWindow,
        progress: Option<&UnboundedSender<FetchProgress>>,
        result: &mut BackfillResult,
    ) -> PipelineResult<()> {
        let loaded = self.repair_samples(asset, window, progress, result).await?;

        for timeframe in self.aggregator.config().timeframes.clone() {
            let stats = self
                .recompute_timeframe(&asset.asset_id, timeframe, window, &loaded)
                .await?;
            debug!(
                asset = %asset.asset_id,
                timeframe = %timeframe,
                checked = stats.periods_checked,
                created = stats.created,
                recalculated = stats.recalculated,
                skipped = stats.skipped,
                empty = stats.empty,
                "타임프레임 재계산 완료"
            );
            result.absorb(stats);
        }
        Ok(())
    }

    /// 1단계: 없는 시각의 샘플만 추가하고, 2단계에서 쓸 샘플 맵을 돌려줍니다.
    async fn repair_samples(
        &self,
        asset: &TrackedAsset,
        window: BackfillWindow,
        progress: Option<&UnboundedSender<FetchProgress>>,
        result: &mut BackfillResult,
    ) -> PipelineResult<LoadedSamples> {
        let venue = self.venue_for(asset).await?;
        let bars: Vec<HistoryBar> = self
            .fetch_bars(&asset.asset_id, &venue, window, progress)
            .await?
            .into_iter()
            .filter(|b| window.contains(b.timestamp))
            .collect();
        result.samples_from_source = bars.len();

        // 가장 긴 타임프레임의 첫 기간까지 덮도록 읽습니다
        let load_from = self
            .aggregator
            .config()
            .timeframes
            .iter()
            .map(|tf| tf.period_start(tf.align_up(window.start)))
            .min()
            .unwrap_or(window.start);

        let (prices, inserted) = self
            .merge_samples(Measurement::RawPrice, asset, load_from, window.end, &bars, |b| {
                b.close
            })
            .await?;
        result.samples_inserted = inserted;
        result.samples_skipped = bars.len().saturating_sub(inserted);

        let volumes = if self.aggregator.config().include_volume {
            let (volumes, _) = self
                .merge_samples(Measurement::RawVolume, asset, load_from, window.end, &bars, |b| {
                    b.volume
                })
                .await?;
            Some(volumes)
        } else {
            None
        };

        Ok(LoadedSamples { prices, volumes })
    }

    /// 기존 샘플을 한 번의 범위 조회로 읽고, 없는 시각의 분봉 값만 기록합니다.
    async fn merge_samples(
        &self,
        measurement: Measurement,
        asset: &TrackedAsset,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bars: &[HistoryBar],
        value: impl Fn(&HistoryBar) -> Decimal,
    ) -> PipelineResult<(SampleIndex, usize)> {
        let asset_id = asset.asset_id.as_str();
        let mut index = SampleIndex::from_points(
            self.samples
                .query_samples(measurement, asset_id, from, to)
                .await?,
        );

        let missing: Vec<SamplePoint> = bars
            .iter()
            .filter(|b| !index.contains(b.timestamp))
            .map(|b| SamplePoint::new(b.timestamp, value(b)))
            .collect();
        if missing.is_empty() {
            return Ok((index, 0));
        }

        let inserted = self
            .samples
            .write_samples(measurement, asset_id, &missing)
            .await?;
        for point in &missing {
            index.insert(point.timestamp, point.value);
        }

        debug!(
            asset = asset_id,
            measurement = measurement.as_str(),
            inserted,
            "샘플 보충"
        );
        Ok((index, inserted))
    }

    /// 저장된 거래 풀이 없으면 조회 후 자산 정보에 기록합니다.
    async fn venue_for(&self, asset: &TrackedAsset) -> PipelineResult<String> {
        if let Some(venue) = &asset.venue_id {
            return Ok(venue.clone());
        }

        let venue = self
            .fetcher
            .resolve_venue(&asset.asset_id)
            .await
            .map_err(upstream)?;

        if let Err(e) = self.assets.set_venue_id(&asset.asset_id, &venue).await {
            warn!(asset = %asset.asset_id, venue = %venue, error = %e, "거래 풀 저장 실패");
        }
        Ok(venue)
    }

    async fn fetch_bars(
        &self,
        asset_id: &str,
        venue: &str,
        window: BackfillWindow,
        progress_sink: Option<&UnboundedSender<FetchProgress>>,
    ) -> PipelineResult<Vec<HistoryBar>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<FetchProgress>();

        let fetch = async move {
            let bars = self
                .fetcher
                .fetch_range(venue, window.start, Utc::now(), Some(&tx))
                .await;
            drop(tx);
            bars
        };
        let report = async {
            while let Some(progress) = rx.recv().await {
                debug!(
                    asset = asset_id,
                    page = progress.page,
                    pages_estimate = progress.pages_estimate,
                    bars = progress.bars_so_far,
                    "히스토리 수집 진행"
                );
                for sink in self.progress.iter().chain(progress_sink) {
                    let _ = sink.send(progress);
                }
            }
        };

        let (bars, ()) = tokio::join!(fetch, report);
        bars.map_err(upstream)
    }

    /// 2단계: 한 타임프레임의 기간들을 분류하고 필요한 캔들만 일괄 재계산합니다.
    async fn recompute_timeframe(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        window: BackfillWindow,
        loaded: &LoadedSamples,
    ) -> PipelineResult<TimeframeStats> {
        let mut stats = TimeframeStats::new(timeframe);
        let period_ends = timeframe.period_ends(window.start, window.end);
        let (Some(first), Some(last)) = (period_ends.first(), period_ends.last()) else {
            return Ok(stats);
        };
        stats.periods_checked = period_ends.len();

        // 구간 내 기존 캔들과 첫 기간의 지표 계산에 필요한 이전 캔들을 한 번에 읽습니다
        let existing = self
            .candles
            .query_candles(
                asset_id,
                timeframe,
                *first - self.aggregator.lookback_span(timeframe),
                *last,
            )
            .await?;
        let existing_by_end: HashMap<DateTime<Utc>, &Candle> =
            existing.iter().map(|c| (c.period_end, c)).collect();

        let mut targets: Vec<(DateTime<Utc>, bool)> = Vec::new();
        for period_end in &period_ends {
            match existing_by_end.get(period_end) {
                Some(candle) if candle.meets_quality(self.config.quality_threshold) => {
                    stats.skipped += 1
                }
                found => targets.push((*period_end, found.is_some())),
            }
        }
        if targets.is_empty() {
            return Ok(stats);
        }

        let target_ends: Vec<DateTime<Utc>> = targets.iter().map(|(pe, _)| *pe).collect();
        let shells = self.aggregator.build_shells(
            asset_id,
            timeframe,
            &target_ends,
            &loaded.prices,
            loaded.volumes.as_ref(),
        );

        let built: HashSet<DateTime<Utc>> = shells.iter().map(|c| c.period_end).collect();
        for (period_end, existed) in &targets {
            if !built.contains(period_end) {
                stats.empty += 1;
            } else if *existed {
                stats.recalculated += 1;
            } else {
                stats.created += 1;
            }
        }
        if shells.is_empty() {
            return Ok(stats);
        }

        let rebuilt = self.aggregator.attach_indicators(shells, &existing);
        self.candles.write_candles(&rebuilt).await?;

        Ok(stats)
    }
}

fn upstream(err: DataError) -> PipelineError {
    PipelineError::Upstream(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationConfig;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use ohlcv_data::{FetcherConfig, HistorySource, MemoryAssetDirectory, MemoryStore, RetryPolicy};

    struct EmptySource;

    #[async_trait]
    impl HistorySource for EmptySource {
        async fn resolve_venue(&self, _asset_id: &str) -> ohlcv_data::Result<String> {
            Ok("Pool".to_string())
        }

        async fn fetch_history(
            &self,
            _venue_id: &str,
            _before: DateTime<Utc>,
            _limit: usize,
        ) -> ohlcv_data::Result<Vec<HistoryBar>> {
            Ok(Vec::new())
        }
    }

    fn window() -> BackfillWindow {
        BackfillWindow::from_dates(
            Utc.with_ymd_and_hms(2025, 10, 21, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 21, 1, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn orchestrator(assets: Vec<TrackedAsset>) -> (BackfillOrchestrator, Arc<MemoryAssetDirectory>) {
        orchestrator_on(Arc::new(MemoryStore::new()), assets)
    }

    fn orchestrator_on(
        store: Arc<MemoryStore>,
        assets: Vec<TrackedAsset>,
    ) -> (BackfillOrchestrator, Arc<MemoryAssetDirectory>) {
        let directory = Arc::new(MemoryAssetDirectory::new(assets));
        let aggregator = Arc::new(CandleAggregator::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            AggregationConfig::default(),
        ));
        let fetcher = Arc::new(RateLimitedHistoryFetcher::new(
            Arc::new(EmptySource),
            FetcherConfig::default(),
            RetryPolicy::default(),
        ));

        let orchestrator = BackfillOrchestrator::new(
            aggregator,
            store.clone(),
            store.clone(),
            directory.clone(),
            store,
            fetcher,
            BackfillConfig::default(),
        );
        (orchestrator, directory)
    }

    #[tokio::test]
    async fn test_guard_released_on_drop() {
        let (orchestrator, _) = orchestrator(vec![]);

        let guard = orchestrator.acquire().await.unwrap();
        assert!(orchestrator.status().await.is_running);
        assert!(matches!(
            orchestrator.acquire().await,
            Err(PipelineError::Concurrency)
        ));

        guard.release().await;
        assert!(!orchestrator.status().await.is_running);
        assert!(orchestrator.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_store_lock_held_elsewhere_rejects_run() {
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, _) = orchestrator_on(store.clone(), vec![TrackedAsset::new("A", "AAA")]);

        let lease = store.try_lock().await.unwrap().unwrap();
        assert!(orchestrator.status().await.is_running);
        let err = orchestrator.run_backfill("A", window()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Concurrency));

        // 로컬 플래그는 잠금 실패 후에도 남지 않아야 함
        lease.release().await.unwrap();
        assert!(!orchestrator.status().await.is_running);
        assert!(orchestrator.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_status_reports_threshold() {
        let (orchestrator, _) = orchestrator(vec![]);
        let status = orchestrator.status().await;
        assert!(!status.is_running);
        assert!((status.quality_threshold - 0.90).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalid_window_rejected() {
        let (orchestrator, _) = orchestrator(vec![TrackedAsset::new("A", "AAA")]);
        let bad = BackfillWindow {
            start: window().end,
            end: window().start,
        };

        let err = orchestrator.run_backfill("A", bad).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(!orchestrator.status().await.is_running);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_asset_rejected() {
        let mut inactive = TrackedAsset::new("B", "BBB");
        inactive.is_active = false;
        let (orchestrator, _) = orchestrator(vec![inactive]);

        let err = orchestrator.run_backfill("A", window()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let err = orchestrator.run_backfill("B", window()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        // 거절 후 플래그가 풀려 있어야 함
        assert!(!orchestrator.status().await.is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_accepts_inactive_asset() {
        let (orchestrator, _) = orchestrator(vec![TrackedAsset::pending("N", "NEW").with_venue("Pool")]);

        let err = orchestrator.run_backfill("N", window()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_initial_load("N", window(), Some(tx))
            .await
            .unwrap();
        assert!(result.success);
        // 실행이 끝나면 진행 채널이 닫혀야 함
        while rx.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_venue_is_cached() {
        let (orchestrator, directory) = orchestrator(vec![TrackedAsset::new("A", "AAA")]);

        let result = orchestrator.run_backfill("A", window()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.samples_from_source, 0);

        let asset = directory.get_asset("A").await.unwrap().unwrap();
        assert_eq!(asset.venue_id.as_deref(), Some("Pool"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_counts_empty_periods() {
        let (orchestrator, _) = orchestrator(vec![TrackedAsset::new("A", "AAA").with_venue("Pool")]);

        let result = orchestrator.run_backfill("A", window()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.candles_created, 0);

        let m1 = result
            .timeframes
            .iter()
            .find(|s| s.timeframe == Some(Timeframe::M1))
            .unwrap();
        // 00:00 ~ 01:00 양끝 포함
        assert_eq!(m1.periods_checked, 61);
        assert_eq!(m1.empty, 61);
    }
}
