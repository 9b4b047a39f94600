//! 데몬 스케줄러.
//!
//! - 집계: 다음 분 경계에서 시작해 `tick_interval`마다 한 회차씩 순차 실행
//! - 실시간 가격: `price_interval`마다 별도 태스크에서 수집
//! - 신규 자산 초기화: 초기화기의 `poll_interval`마다 대기 자산 하나씩 처리
//!
//! 집계 회차는 겹치지 않으므로 같은 캔들 키를 두 곳에서 동시에 쓰지 않습니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::aggregator::CandleAggregator;
use super::initializer::HistoryInitializer;
use super::price_collect::PriceCollector;
use crate::config::DaemonConfig;
use crate::stats::AggregationStats;

/// `now` 이후 다음 분 경계까지 남은 시간. 정확히 경계이면 0.
pub fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let rem = now.timestamp_millis().rem_euclid(60_000);
    if rem == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((60_000 - rem) as u64)
    }
}

/// 종료 신호가 올 때까지 집계(및 선택적으로 가격 수집, 신규 자산 초기화)를 반복합니다.
///
/// 누적 집계 통계를 돌려줍니다.
pub async fn run_daemon(
    aggregator: Arc<CandleAggregator>,
    prices: Option<Arc<PriceCollector>>,
    initializer: Option<Arc<HistoryInitializer>>,
    config: DaemonConfig,
    shutdown: impl Future<Output = ()>,
) -> AggregationStats {
    let (stop_tx, stop_rx) = watch::channel(false);

    let price_task = prices.map(|collector| {
        let period = config.price_interval;
        tokio::spawn(price_loop(collector, period, stop_rx.clone()))
    });
    let init_task = initializer.map(|initializer| tokio::spawn(init_loop(initializer, stop_rx.clone())));

    let start = Instant::now() + until_next_minute(Utc::now());
    let mut ticker = interval_at(start, config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        tick_interval_secs = config.tick_interval.as_secs(),
        price_collection = price_task.is_some(),
        initialization = init_task.is_some(),
        "데몬 시작"
    );

    let mut total = AggregationStats::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("종료 신호 수신, 데몬 종료");
                break;
            }
            _ = ticker.tick() => {
                let stats = aggregator.on_tick(Utc::now()).await;
                total.merge(&stats);
            }
        }
    }

    let _ = stop_tx.send(true);
    if let Some(task) = price_task {
        if let Err(e) = task.await {
            warn!(error = %e, "가격 수집 태스크 종료 실패");
        }
    }
    if let Some(task) = init_task {
        if let Err(e) = task.await {
            warn!(error = %e, "초기화 태스크 종료 실패");
        }
    }

    total.log_summary("daemon");
    total
}

async fn price_loop(collector: Arc<PriceCollector>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                collector.collect_once(Utc::now()).await;
            }
        }
    }
}

async fn init_loop(initializer: Arc<HistoryInitializer>, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval(initializer.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // 실패는 자산의 초기화 상태에 기록되므로 여기서는 로그만 남김
                if let Err(e) = initializer.initialize_next(Utc::now()).await {
                    warn!(error = %e, "신규 자산 초기화 회차 실패");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationConfig;
    use chrono::TimeZone;
    use ohlcv_data::{MemoryAssetDirectory, MemoryStore};

    #[test]
    fn test_until_next_minute() {
        let on_boundary = Utc.with_ymd_and_hms(2025, 10, 21, 12, 0, 0).unwrap();
        assert_eq!(until_next_minute(on_boundary), Duration::ZERO);

        let mid = Utc.with_ymd_and_hms(2025, 10, 21, 12, 0, 45).unwrap();
        assert_eq!(until_next_minute(mid), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_daemon_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Arc::new(CandleAggregator::new(
            store.clone(),
            store,
            Arc::new(MemoryAssetDirectory::new(vec![])),
            AggregationConfig::default(),
        ));
        let config = DaemonConfig {
            tick_interval: Duration::from_secs(60),
            price_interval: Duration::from_secs(5),
            price_collection: false,
            initialization: false,
        };

        let stats = run_daemon(
            aggregator,
            None,
            None,
            config,
            tokio::time::sleep(Duration::from_secs(200)),
        )
        .await;

        // 추적 자산이 없으므로 처리한 것도 없음
        assert_eq!(stats.total, 0);
        assert_eq!(stats.errors, 0);
    }
}
