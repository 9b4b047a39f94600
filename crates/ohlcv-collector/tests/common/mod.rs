//! 통합 테스트 공용 도우미.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ohlcv_collector::{AggregationConfig, BackfillConfig, BackfillOrchestrator, CandleAggregator};
use ohlcv_core::{HistoryBar, Measurement, SamplePoint, Timeframe, TrackedAsset};
use ohlcv_data::{
    DataError, FetcherConfig, HistorySource, MemoryAssetDirectory, MemoryStore,
    RateLimitedHistoryFetcher, RetryPolicy, SampleStore,
};
use rust_decimal::Decimal;
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 21, 0, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

/// `from`부터 1분 간격 분봉 `count`개.
pub fn minute_bars(from: DateTime<Utc>, count: i64) -> Vec<HistoryBar> {
    (0..count)
        .map(|i| {
            let close = Decimal::from(100 + i % 7);
            HistoryBar {
                timestamp: from + minutes(i),
                open: close,
                high: close,
                low: close,
                close,
                volume: Decimal::from(10),
            }
        })
        .collect()
}

/// `[from, to]`에 5초 간격 원시 가격 샘플을 기록합니다.
pub async fn seed_samples(store: &MemoryStore, asset_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) {
    let mut points = Vec::new();
    let mut ts = from;
    let mut i = 0i64;
    while ts <= to {
        points.push(SamplePoint::new(ts, Decimal::from(100 + (i / 12) % 9)));
        ts += chrono::Duration::seconds(5);
        i += 1;
    }
    store
        .write_samples(Measurement::RawPrice, asset_id, &points)
        .await
        .unwrap();
}

/// 고정된 분봉 목록을 `before` 이전부터 최신 순으로 페이지 단위로 돌려주는 소스.
pub struct ScriptedSource {
    bars: Vec<HistoryBar>,
    unknown_assets: Vec<String>,
    fail_history: bool,
}

impl ScriptedSource {
    pub fn new(bars: Vec<HistoryBar>) -> Self {
        Self {
            bars,
            unknown_assets: Vec::new(),
            fail_history: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// 이 자산의 거래 풀 조회는 NotFound로 실패합니다.
    pub fn with_unknown(mut self, asset_id: &str) -> Self {
        self.unknown_assets.push(asset_id.to_string());
        self
    }

    /// 분봉 조회가 항상 재시도 가능한 에러로 실패합니다.
    pub fn failing() -> Self {
        Self {
            fail_history: true,
            ..Self::empty()
        }
    }
}

#[async_trait]
impl HistorySource for ScriptedSource {
    async fn resolve_venue(&self, asset_id: &str) -> ohlcv_data::Result<String> {
        if self.unknown_assets.iter().any(|a| a == asset_id) {
            return Err(DataError::NotFound(format!("{} 거래 풀 없음", asset_id)));
        }
        Ok(format!("pool-{}", asset_id))
    }

    async fn fetch_history(
        &self,
        _venue_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> ohlcv_data::Result<Vec<HistoryBar>> {
        if self.fail_history {
            return Err(DataError::FetchError("503 Service Unavailable".to_string()));
        }
        let mut page: Vec<HistoryBar> = self
            .bars
            .iter()
            .filter(|b| b.timestamp < before)
            .cloned()
            .collect();
        page.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        page.truncate(limit);
        Ok(page)
    }
}

/// 첫 분봉 요청에서 `release`가 올 때까지 멈추는 소스.
pub struct GatedSource {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl HistorySource for GatedSource {
    async fn resolve_venue(&self, asset_id: &str) -> ohlcv_data::Result<String> {
        Ok(format!("pool-{}", asset_id))
    }

    async fn fetch_history(
        &self,
        _venue_id: &str,
        _before: DateTime<Utc>,
        _limit: usize,
    ) -> ohlcv_data::Result<Vec<HistoryBar>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Vec::new())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryAssetDirectory>,
    pub aggregator: Arc<CandleAggregator>,
    pub orchestrator: Arc<BackfillOrchestrator>,
}

pub fn fetcher_config() -> FetcherConfig {
    FetcherConfig {
        page_limit: 1000,
        min_request_spacing: Duration::ZERO,
        rate_limit_cooldown: Duration::from_secs(60),
    }
}

/// 인메모리 저장소와 주어진 소스로 집계기/조정자를 구성합니다.
pub fn harness(
    source: impl HistorySource + 'static,
    assets: Vec<TrackedAsset>,
    timeframes: Vec<Timeframe>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(MemoryAssetDirectory::new(assets));
    let aggregator = Arc::new(CandleAggregator::new(
        store.clone(),
        store.clone(),
        directory.clone(),
        AggregationConfig {
            timeframes,
            ..Default::default()
        },
    ));
    let orchestrator = Arc::new(orchestrator_on(&store, &directory, &aggregator, source));

    Harness {
        store,
        directory,
        aggregator,
        orchestrator,
    }
}

/// 같은 저장소와 자산 목록을 쓰는 별도 조정자. 다른 프로세스의 수집기를 흉내냅니다.
pub fn orchestrator_on(
    store: &Arc<MemoryStore>,
    directory: &Arc<MemoryAssetDirectory>,
    aggregator: &Arc<CandleAggregator>,
    source: impl HistorySource + 'static,
) -> BackfillOrchestrator {
    let fetcher = Arc::new(RateLimitedHistoryFetcher::new(
        Arc::new(source),
        fetcher_config(),
        RetryPolicy::default(),
    ));
    BackfillOrchestrator::new(
        aggregator.clone(),
        store.clone(),
        store.clone(),
        directory.clone(),
        store.clone(),
        fetcher,
        BackfillConfig::default(),
    )
}
