//! 추세 지표 (Trend Indicators).
//!
//! - EMA (Exponential Moving Average)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{IndicatorError, IndicatorResult};

/// EMA 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmaParams {
    /// 이동평균 기간.
    pub period: usize,
}

impl Default for EmaParams {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// 추세 지표 계산기.
#[derive(Debug, Default)]
pub struct TrendIndicators;

impl TrendIndicators {
    pub fn new() -> Self {
        Self
    }

    /// 종가 시퀀스(오래된 순)의 마지막 시점 EMA.
    ///
    /// 처음 `period`개 종가의 SMA로 시작해 이후 종가마다
    /// `ema = (close - ema) × k + ema`, `k = 2 / (period + 1)` 적용.
    ///
    /// 종가가 `period`개 미만이면 `Ok(None)`.
    pub fn ema(&self, closes: &[Decimal], params: EmaParams) -> IndicatorResult<Option<Decimal>> {
        let period = params.period;

        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "기간은 0보다 커야 합니다".to_string(),
            ));
        }

        if closes.len() < period {
            return Ok(None);
        }

        let seed: Decimal = closes[..period].iter().sum::<Decimal>() / Decimal::from(period);
        let multiplier = Decimal::TWO / Decimal::from(period + 1);

        let ema = closes[period..]
            .iter()
            .fold(seed, |ema, close| (*close - ema) * multiplier + ema);

        Ok(Some(ema))
    }
}
