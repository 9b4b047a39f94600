//! 모멘텀 지표 (Momentum Indicators).
//!
//! - RSI (Relative Strength Index, Wilder 평활)

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{IndicatorError, IndicatorResult};

/// RSI 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsiParams {
    /// RSI 기간 (기본: 14).
    pub period: usize,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// 모멘텀 지표 계산기.
#[derive(Debug, Default)]
pub struct MomentumCalculator;

impl MomentumCalculator {
    pub fn new() -> Self {
        Self
    }

    /// 종가 시퀀스(오래된 순)의 마지막 시점 RSI.
    ///
    /// 1. 연속 종가의 변화량을 상승(gain)/하락(loss)으로 분리
    /// 2. 변화량이 `period`개 미만이면 전체 단순 평균
    /// 3. 그 외에는 처음 `period`개의 단순 평균으로 시작해
    ///    이후 변화마다 `avg = (avg × (period - 1) + value) / period` 적용
    /// 4. 움직임이 전혀 없으면 50, 그 외에는 `100 × gain / (gain + loss)`
    ///
    /// 종가가 2개 미만이면 `Ok(None)`을 반환합니다 (에러 아님).
    pub fn rsi(&self, closes: &[Decimal], params: RsiParams) -> IndicatorResult<Option<Decimal>> {
        let period = params.period;

        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "기간은 0보다 커야 합니다".to_string(),
            ));
        }

        if closes.len() < 2 {
            return Ok(None);
        }

        let (gains, losses): (Vec<Decimal>, Vec<Decimal>) = closes
            .windows(2)
            .map(|w| {
                let change = w[1] - w[0];
                if change > Decimal::ZERO {
                    (change, Decimal::ZERO)
                } else {
                    (Decimal::ZERO, -change)
                }
            })
            .unzip();

        let (avg_gain, avg_loss) = if gains.len() < period {
            (mean(&gains)?, mean(&losses)?)
        } else {
            let period_dec = Decimal::from(period);
            let keep = period_dec - Decimal::ONE;
            let mut avg_gain = mean(&gains[..period])?;
            let mut avg_loss = mean(&losses[..period])?;

            for (gain, loss) in gains[period..].iter().zip(&losses[period..]) {
                avg_gain = wilder_step(avg_gain, *gain, keep, period_dec)?;
                avg_loss = wilder_step(avg_loss, *loss, keep, period_dec)?;
            }
            (avg_gain, avg_loss)
        };

        let total = avg_gain + avg_loss;
        if total.is_zero() {
            return Ok(Some(dec!(50)));
        }

        let rsi = (dec!(100) * avg_gain)
            .checked_div(total)
            .ok_or_else(|| IndicatorError::CalculationError("RSI 나눗셈 실패".to_string()))?;

        Ok(Some(rsi.clamp(Decimal::ZERO, dec!(100))))
    }
}

fn mean(values: &[Decimal]) -> IndicatorResult<Decimal> {
    let sum: Decimal = values.iter().sum();
    sum.checked_div(Decimal::from(values.len()))
        .ok_or_else(|| IndicatorError::CalculationError("빈 구간의 평균".to_string()))
}

fn wilder_step(
    avg: Decimal,
    value: Decimal,
    keep: Decimal,
    period: Decimal,
) -> IndicatorResult<Decimal> {
    (avg * keep + value)
        .checked_div(period)
        .ok_or_else(|| IndicatorError::CalculationError("Wilder 평활 실패".to_string()))
}
