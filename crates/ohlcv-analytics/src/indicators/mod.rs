//! 기술적 지표 모듈.
//!
//! # 지원 지표
//!
//! - **RSI**: Wilder 평활 상대강도지수 (기간 14)
//! - **EMA**: 지수 이동평균 (기간 14)
//!
//! 두 지표 모두 입력 종가 시퀀스만의 순수 함수이므로 같은 입력으로
//! 재계산하면 항상 같은 결과를 얻습니다.
//!
//! # 사용 예시
//!
//! ```ignore
//! use ohlcv_analytics::indicators::IndicatorEngine;
//!
//! let engine = IndicatorEngine::new();
//! // 이전 캔들 + 현재 캔들 (오래된 순)
//! let values = engine.candle_indicators(&series);
//! current.set_indicators(values.rsi, values.rsi_quality, values.ema);
//! ```

pub mod momentum;
pub mod trend;

use ohlcv_core::Candle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::QualityScorer;

pub use momentum::{MomentumCalculator, RsiParams};
pub use trend::{EmaParams, TrendIndicators};

/// 지표 계산 오류.
#[derive(Debug, Error)]
pub enum IndicatorError {
    /// 잘못된 파라미터
    #[error("잘못된 파라미터: {0}")]
    InvalidParameter(String),

    /// 계산 오류
    #[error("계산 오류: {0}")]
    CalculationError(String),
}

/// 지표 계산 결과 타입.
pub type IndicatorResult<T> = Result<T, IndicatorError>;

/// 한 캔들에 붙일 지표 값.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorValues {
    pub rsi: Option<Decimal>,
    pub rsi_quality: f64,
    pub ema: Option<Decimal>,
}

/// 통합 지표 엔진.
#[derive(Debug, Default)]
pub struct IndicatorEngine {
    trend: TrendIndicators,
    momentum: MomentumCalculator,
    rsi_params: RsiParams,
    ema_params: EmaParams,
}

impl IndicatorEngine {
    /// 기본 파라미터(RSI14, EMA14)로 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 종가 시퀀스의 RSI.
    pub fn rsi(&self, closes: &[Decimal]) -> IndicatorResult<Option<Decimal>> {
        self.momentum.rsi(closes, self.rsi_params)
    }

    /// 종가 시퀀스의 EMA.
    pub fn ema(&self, closes: &[Decimal]) -> IndicatorResult<Option<Decimal>> {
        self.trend.ema(closes, self.ema_params)
    }

    /// 이전 캔들과 현재 캔들(마지막 원소) 시퀀스로 현재 캔들의 지표를 계산합니다.
    ///
    /// 시퀀스는 같은 타임프레임, 오래된 순이어야 합니다.
    /// 히스토리가 부족하면 에러 대신 None/0을 돌려줍니다.
    pub fn candle_indicators(&self, series: &[Candle]) -> IndicatorValues {
        let closes: Vec<Decimal> = series.iter().map(|c| c.close).collect();

        let rsi = self.rsi(&closes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "RSI 계산 실패");
            None
        });
        let ema = self.ema(&closes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "EMA 계산 실패");
            None
        });

        let rsi_quality = match (rsi, series.first()) {
            (Some(_), Some(first)) => QualityScorer::rsi_quality(series, first.timeframe),
            _ => 0.0,
        };

        IndicatorValues {
            rsi,
            rsi_quality,
            ema,
        }
    }
}
