//! # OHLCV Analytics
//!
//! 캔들 지표 계산과 데이터 품질 점수를 제공합니다.
//! 모든 계산은 동기 순수 함수입니다.

pub mod indicators;
pub mod quality;

pub use indicators::{IndicatorEngine, IndicatorError, IndicatorResult, IndicatorValues};
pub use quality::{QualityScorer, FULL_RSI_LOOKBACK};
