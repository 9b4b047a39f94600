//! 데이터 품질 점수.
//!
//! - 캔들 품질: 기간 내 관측 샘플 수 / 기대 샘플 수
//! - 갭 탐지: 연속 캔들 간격이 기간의 1.1배를 넘으면 누락 기간 수를 누적
//! - RSI 품질: 캔들 수 계수 × 갭 페널티 × 가중 평균 캔들 품질

use chrono::{DateTime, Utc};
use ohlcv_core::{clamp_unit, Candle, Timeframe};
use std::time::Duration;

/// 완전한 Wilder RSI14 평활에 필요한 캔들 수 (이전 30 + 현재 1).
pub const FULL_RSI_LOOKBACK: usize = 31;

/// 갭 페널티가 0이 되는 누락 기간 수.
const MAX_GAPS: f64 = 30.0;

/// 간격이 기간의 이 배수를 넘으면 갭으로 판단.
const GAP_TOLERANCE: f64 = 1.1;

/// 품질 점수 계산기.
#[derive(Debug, Clone, Copy)]
pub struct QualityScorer {
    sample_interval_ms: u64,
}

impl QualityScorer {
    /// 원시 샘플의 명목 간격으로 생성합니다.
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sample_interval_ms: sample_interval.as_millis().max(1) as u64,
        }
    }

    /// `clamp(observed / expected, 0, 1)`. 기대값이 0이면 0.
    pub fn score(observed: usize, expected: f64) -> f64 {
        if expected <= 0.0 {
            return 0.0;
        }
        clamp_unit(observed as f64 / expected)
    }

    /// 한 기간에 기대되는 샘플 수.
    pub fn expected_samples(&self, timeframe: Timeframe) -> f64 {
        timeframe.as_millis() as f64 / self.sample_interval_ms as f64
    }

    /// 한 캔들의 `quality_factor`.
    pub fn candle_quality(&self, timeframe: Timeframe, observed: usize) -> f64 {
        Self::score(observed, self.expected_samples(timeframe))
    }

    /// 정렬된 기간 종료 시각 시퀀스에서 누락된 기간 수를 셉니다.
    pub fn count_gaps(period_ends: &[DateTime<Utc>], timeframe: Timeframe) -> usize {
        let expected = timeframe.as_millis();
        let threshold = expected as f64 * GAP_TOLERANCE;

        period_ends
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds())
            .filter(|delta| *delta as f64 > threshold)
            .map(|delta| (delta / expected - 1) as usize)
            .sum()
    }

    /// 지표 입력 시퀀스(이전 캔들 + 현재 캔들)의 RSI 품질.
    ///
    /// 캔들이 2개 미만이면 0.
    pub fn rsi_quality(series: &[Candle], timeframe: Timeframe) -> f64 {
        let n = series.len();
        if n < 2 {
            return 0.0;
        }

        let period_ends: Vec<DateTime<Utc>> = series.iter().map(|c| c.period_end).collect();
        let gaps = Self::count_gaps(&period_ends, timeframe);

        let count_factor = (n as f64 / FULL_RSI_LOOKBACK as f64).min(1.0);
        let gap_penalty = (1.0 - gaps as f64 / MAX_GAPS).max(0.0);

        // 최근 캔들일수록 가중치가 커짐 (최대 2배). 첫 캔들은 변화량이 없으므로 제외.
        let (weighted, total_weight) = series
            .iter()
            .enumerate()
            .skip(1)
            .fold((0.0, 0.0), |(sum, total), (i, candle)| {
                let weight = 1.0 + i as f64 / n as f64;
                (sum + candle.quality_factor * weight, total + weight)
            });

        if gaps > 0 {
            tracing::debug!(timeframe = %timeframe, gaps, "지표 입력에서 갭 감지");
        }

        clamp_unit(count_factor * gap_penalty * (weighted / total_weight))
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}
