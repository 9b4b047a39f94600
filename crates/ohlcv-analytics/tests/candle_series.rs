//! 캔들 시퀀스 단위의 지표/품질 계산.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ohlcv_analytics::{IndicatorEngine, QualityScorer, FULL_RSI_LOOKBACK};
use ohlcv_core::{Candle, Timeframe};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 21, 0, 0, 0).unwrap()
}

fn candle(timeframe: Timeframe, index: i64, close: Decimal, quality: f64) -> Candle {
    Candle::shell(
        "Mint",
        timeframe,
        base() + timeframe.chrono_duration() * index as i32,
        close,
        close,
        close,
        close,
        Decimal::ZERO,
        quality,
    )
}

#[test]
fn test_full_lookback_rising_series() {
    let series: Vec<Candle> = (0..FULL_RSI_LOOKBACK as i64)
        .map(|i| candle(Timeframe::H1, i, Decimal::from(100 + i), 1.0))
        .collect();

    let values = IndicatorEngine::new().candle_indicators(&series);
    assert_eq!(values.rsi, Some(dec!(100)));
    assert!((values.rsi_quality - 1.0).abs() < 1e-9);

    // EMA는 마지막 종가보다 아래, 첫 종가보다 위
    let ema = values.ema.unwrap();
    assert!(ema > dec!(100) && ema < dec!(130));
}

#[test]
fn test_gaps_reduce_rsi_quality() {
    // 10개 기간마다 한 번씩 빠진 시퀀스
    let series: Vec<Candle> = (0..34i64)
        .filter(|i| i % 10 != 5)
        .map(|i| candle(Timeframe::M15, i, Decimal::from(100 + i % 3), 1.0))
        .collect();

    let gaps = QualityScorer::count_gaps(
        &series.iter().map(|c| c.period_end).collect::<Vec<_>>(),
        Timeframe::M15,
    );
    assert_eq!(gaps, 3);

    let values = IndicatorEngine::new().candle_indicators(&series);
    let expected = (series.len() as f64 / 31.0).min(1.0) * (1.0 - 3.0 / 30.0);
    assert!((values.rsi_quality - expected).abs() < 1e-9);
}

#[test]
fn test_low_quality_recent_candles_weigh_more() {
    let mut early_bad: Vec<Candle> = (0..31i64)
        .map(|i| candle(Timeframe::M5, i, Decimal::from(100 + i % 4), 1.0))
        .collect();
    let mut late_bad = early_bad.clone();

    for c in early_bad.iter_mut().skip(1).take(5) {
        c.quality_factor = 0.0;
    }
    for c in late_bad.iter_mut().rev().take(5) {
        c.quality_factor = 0.0;
    }

    let early = QualityScorer::rsi_quality(&early_bad, Timeframe::M5);
    let late = QualityScorer::rsi_quality(&late_bad, Timeframe::M5);
    assert!(late < early);
}

proptest! {
    #[test]
    fn prop_indicator_ranges(
        closes in prop::collection::vec(1u32..1_000_000, 0..60),
        qualities in prop::collection::vec(-1.0f64..2.0, 60),
    ) {
        let series: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| candle(Timeframe::M1, i as i64, Decimal::from(*c), qualities[i]))
            .collect();

        prop_assert!(series.iter().all(|c| (0.0..=1.0).contains(&c.quality_factor)));

        let values = IndicatorEngine::new().candle_indicators(&series);
        prop_assert!((0.0..=1.0).contains(&values.rsi_quality));
        if let Some(rsi) = values.rsi {
            prop_assert!(rsi >= Decimal::ZERO && rsi <= dec!(100));
        }
        if closes.len() < 2 {
            prop_assert!(values.rsi.is_none());
            prop_assert_eq!(values.rsi_quality, 0.0);
        }
    }
}
