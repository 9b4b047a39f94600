//! OHLCV 캔들 수집기.
//!
//! 이 crate는 다음을 제공합니다:
//! - 실시간 가격 수집 (원시 샘플)
//! - 분 경계에 맞춘 다중 타임프레임 캔들 집계 (RSI, EMA, 품질 점수 포함)
//! - 누락 샘플 보충과 저품질 캔들 재계산을 수행하는 2단계 백필
//! - 신규 자산의 히스토리 초기화와 활성화

pub mod config;
pub mod error;
pub mod modules;
pub mod stats;

pub use config::{
    AggregationConfig, BackfillConfig, CollectorConfig, DaemonConfig, InitializerConfig,
};
pub use error::{CollectorError, Result};
pub use modules::{
    BackfillOrchestrator, CandleAggregator, HistoryInitializer, PriceCollector, SampleIndex,
};
pub use stats::{AggregationStats, PriceCollectStats};
