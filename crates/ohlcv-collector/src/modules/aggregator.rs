//! 원시 샘플 → OHLCV 캔들 집계.
//!
//! 실시간 경로와 백필 경로가 같은 순수 함수 [`build_candle`]을 사용합니다.
//! - 실시간: 기간마다 한 번의 범위 조회로 [`SampleIndex`]를 만들고 바로 저장
//! - 백필: 구간 전체의 [`SampleIndex`]를 한 번 만들고 기간별로 메모리에서 조회

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ohlcv_analytics::{IndicatorEngine, QualityScorer};
use ohlcv_core::{Candle, Measurement, PipelineResult, SamplePoint, Timeframe};
use ohlcv_data::{AssetDirectory, CandleStore, SampleStore};
use rust_decimal::Decimal;
use tracing::{debug, error, instrument, warn};

use crate::config::AggregationConfig;
use crate::stats::AggregationStats;

/// 시각 → 값 인메모리 맵.
#[derive(Debug, Clone, Default)]
pub struct SampleIndex {
    points: BTreeMap<DateTime<Utc>, Decimal>,
}

impl SampleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: impl IntoIterator<Item = SamplePoint>) -> Self {
        Self {
            points: points
                .into_iter()
                .map(|p| (p.timestamp, p.value))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.points.contains_key(&timestamp)
    }

    /// 없는 시각이면 추가하고 true. 기존 값은 바꾸지 않습니다.
    pub fn insert(&mut self, timestamp: DateTime<Utc>, value: Decimal) -> bool {
        match self.points.entry(timestamp) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// 기간 `(period_end - duration, period_end]`의 샘플 (오래된 순).
    pub fn window(
        &self,
        timeframe: Timeframe,
        period_end: DateTime<Utc>,
    ) -> impl Iterator<Item = (DateTime<Utc>, Decimal)> + '_ {
        let start = timeframe.period_start(period_end);
        self.points
            .range((Bound::Excluded(start), Bound::Included(period_end)))
            .map(|(ts, value)| (*ts, *value))
    }
}

/// 한 기간의 샘플로 지표 없는 캔들을 만듭니다.
///
/// 기간 안에 샘플이 없으면 None.
pub fn build_candle(
    asset_id: &str,
    timeframe: Timeframe,
    period_end: DateTime<Utc>,
    prices: &SampleIndex,
    volumes: Option<&SampleIndex>,
    scorer: &QualityScorer,
) -> Option<Candle> {
    let mut window = prices.window(timeframe, period_end);
    let (_, open) = window.next()?;

    let (mut high, mut low, mut close, mut count) = (open, open, open, 1usize);
    for (_, price) in window {
        high = high.max(price);
        low = low.min(price);
        close = price;
        count += 1;
    }

    let volume = volumes
        .map(|v| v.window(timeframe, period_end).map(|(_, x)| x).sum())
        .unwrap_or(Decimal::ZERO);

    Some(Candle::shell(
        asset_id,
        timeframe,
        period_end,
        open,
        high,
        low,
        close,
        volume,
        scorer.candle_quality(timeframe, count),
    ))
}

/// 캔들 집계기.
pub struct CandleAggregator {
    samples: Arc<dyn SampleStore>,
    candles: Arc<dyn CandleStore>,
    assets: Arc<dyn AssetDirectory>,
    config: AggregationConfig,
    scorer: QualityScorer,
    engine: IndicatorEngine,
}

impl CandleAggregator {
    pub fn new(
        samples: Arc<dyn SampleStore>,
        candles: Arc<dyn CandleStore>,
        assets: Arc<dyn AssetDirectory>,
        config: AggregationConfig,
    ) -> Self {
        let scorer = QualityScorer::new(config.sample_interval);
        Self {
            samples,
            candles,
            assets,
            config,
            scorer,
            engine: IndicatorEngine::new(),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// 지표 계산에 쓰는 이전 캔들 구간 길이.
    pub fn lookback_span(&self, timeframe: Timeframe) -> chrono::Duration {
        timeframe.chrono_duration() * self.config.indicator_lookback as i32
    }

    /// 스케줄러 한 회차. `now`를 분 단위로 내린 시각이 경계인 타임프레임만 집계합니다.
    ///
    /// 자산/타임프레임 하나의 실패는 로그만 남기고 다음으로 넘어갑니다.
    pub async fn on_tick(&self, now: DateTime<Utc>) -> AggregationStats {
        let started = Instant::now();
        let tick = Timeframe::M1.align_down(now);
        let mut stats = AggregationStats::new();

        let due: Vec<Timeframe> = self
            .config
            .timeframes
            .iter()
            .copied()
            .filter(|tf| tf.is_period_boundary(tick))
            .collect();
        if due.is_empty() {
            return stats;
        }

        let assets = match self.assets.list_active_assets().await {
            Ok(assets) => assets,
            Err(e) => {
                error!(error = %e, "추적 자산 조회 실패");
                stats.errors += 1;
                stats.elapsed = started.elapsed();
                return stats;
            }
        };

        for timeframe in due {
            for asset in &assets {
                stats.total += 1;
                match self.build_live(&asset.asset_id, timeframe, tick).await {
                    Ok(Some(_)) => stats.built += 1,
                    Ok(None) => stats.empty += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!(
                            asset = %asset.asset_id,
                            timeframe = %timeframe,
                            error = %e,
                            "캔들 집계 실패"
                        );
                    }
                }
            }
        }

        stats.elapsed = started.elapsed();
        stats.log_summary("live_aggregation");
        stats
    }

    /// 한 기간의 캔들을 저장소 조회로 만들고 지표를 붙여 저장합니다.
    ///
    /// 같은 키의 캔들이 있으면 덮어씁니다. 샘플이 없으면 `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn build_live(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        period_end: DateTime<Utc>,
    ) -> PipelineResult<Option<Candle>> {
        let period_start = timeframe.period_start(period_end);

        let prices = SampleIndex::from_points(
            self.samples
                .query_samples(Measurement::RawPrice, asset_id, period_start, period_end)
                .await?,
        );
        let volumes = if self.config.include_volume {
            Some(SampleIndex::from_points(
                self.samples
                    .query_samples(Measurement::RawVolume, asset_id, period_start, period_end)
                    .await?,
            ))
        } else {
            None
        };

        let Some(mut candle) = build_candle(
            asset_id,
            timeframe,
            period_end,
            &prices,
            volumes.as_ref(),
            &self.scorer,
        ) else {
            debug!("기간 내 샘플 없음, 건너뜀");
            return Ok(None);
        };

        let mut series = self
            .candles
            .query_candles(
                asset_id,
                timeframe,
                period_end - self.lookback_span(timeframe),
                period_start,
            )
            .await?;
        series.push(candle.clone());

        let values = self.engine.candle_indicators(&series);
        candle.set_indicators(values.rsi, values.rsi_quality, values.ema);

        self.candles.write_candle(&candle).await?;
        debug!(quality = candle.quality_factor, rsi = ?candle.rsi, "캔들 저장");
        Ok(Some(candle))
    }

    /// 기간 종료 시각 목록에 대해 지표 없는 캔들을 만듭니다.
    ///
    /// 샘플이 없는 기간은 결과에서 빠집니다.
    pub fn build_shells(
        &self,
        asset_id: &str,
        timeframe: Timeframe,
        period_ends: &[DateTime<Utc>],
        prices: &SampleIndex,
        volumes: Option<&SampleIndex>,
    ) -> Vec<Candle> {
        period_ends
            .iter()
            .filter_map(|pe| build_candle(asset_id, timeframe, *pe, prices, volumes, &self.scorer))
            .collect()
    }

    /// 다시 만든 캔들에 한 번의 순회로 지표를 붙입니다.
    ///
    /// `existing`은 같은 자산/타임프레임의 저장된 캔들이며, 같은 기간이면
    /// 다시 만든 캔들이 우선합니다. 각 캔들은 자기 이전 `indicator_lookback`개
    /// 기간과 자기 자신만 보므로 전체 비용은 캔들 수에 비례합니다.
    pub fn attach_indicators(&self, shells: Vec<Candle>, existing: &[Candle]) -> Vec<Candle> {
        let Some(timeframe) = shells.first().map(|c| c.timeframe) else {
            return Vec::new();
        };
        let span = self.lookback_span(timeframe);

        let mut merged: BTreeMap<DateTime<Utc>, Candle> = existing
            .iter()
            .map(|c| (c.period_end, c.clone()))
            .collect();
        let mut order: Vec<DateTime<Utc>> = Vec::with_capacity(shells.len());
        for shell in shells {
            order.push(shell.period_end);
            merged.insert(shell.period_end, shell);
        }
        order.sort();

        let mut out = Vec::with_capacity(order.len());
        for period_end in order {
            let series: Vec<Candle> = merged
                .range(period_end - span..=period_end)
                .map(|(_, c)| c.clone())
                .collect();
            let values = self.engine.candle_indicators(&series);

            if let Some(candle) = merged.get_mut(&period_end) {
                candle.set_indicators(values.rsi, values.rsi_quality, values.ema);
                out.push(candle.clone());
            }
        }
        out
    }
}
