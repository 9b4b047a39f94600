mod common;

use common::*;
use ohlcv_core::{Timeframe, TrackedAsset};
use ohlcv_data::CandleStore;

#[tokio::test]
async fn test_ticks_build_candles_with_indicators() {
    let h = harness(
        ScriptedSource::empty(),
        vec![TrackedAsset::new("A", "AAA"), TrackedAsset::new("B", "BBB")],
        vec![Timeframe::M1, Timeframe::M5],
    );
    seed_samples(&h.store, "A", t0(), t0() + minutes(31)).await;

    // 매 분 경계 직후 호출
    for minute in 1..=31 {
        let stats = h
            .aggregator
            .on_tick(t0() + minutes(minute) + chrono::Duration::milliseconds(250))
            .await;
        assert_eq!(stats.errors, 0);
        // B는 샘플이 없음
        assert!(stats.empty >= 1);
    }

    let m1 = h
        .store
        .query_candles("A", Timeframe::M1, t0(), t0() + minutes(31))
        .await
        .unwrap();
    assert_eq!(m1.len(), 31);

    let last = m1.last().unwrap();
    assert!((last.quality_factor - 1.0).abs() < 1e-9);
    assert!(last.rsi.is_some());
    assert!(last.ema.is_some());
    // 이전 30개 + 현재 = 31개, 모두 품질 1.0
    assert!((last.rsi_quality - 1.0).abs() < 1e-9);

    let m5 = h
        .store
        .query_candles("A", Timeframe::M5, t0(), t0() + minutes(31))
        .await
        .unwrap();
    assert_eq!(m5.len(), 6);
    assert!(m5.iter().all(|c| Timeframe::M5.is_period_boundary(c.period_end)));

    assert!(h
        .store
        .query_candles("B", Timeframe::M1, t0(), t0() + minutes(31))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_backfilled_history_feeds_live_indicators() {
    let h = harness(
        ScriptedSource::empty(),
        vec![TrackedAsset::new("A", "AAA").with_venue("pool-A")],
        vec![Timeframe::M1],
    );
    seed_samples(&h.store, "A", t0(), t0() + minutes(41)).await;

    let window = ohlcv_core::BackfillWindow::from_dates(t0() + minutes(1), t0() + minutes(40)).unwrap();
    let result = h.orchestrator.run_backfill("A", window).await.unwrap();
    assert_eq!(result.candles_created, 40);

    let live = h
        .aggregator
        .build_live("A", Timeframe::M1, t0() + minutes(41))
        .await
        .unwrap()
        .unwrap();
    assert!((live.rsi_quality - 1.0).abs() < 1e-9);
    assert_eq!(h.store.candle_count().await, 41);
}
