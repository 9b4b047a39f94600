//! 집계/백필/초기화/수집 모듈.

pub mod aggregator;
pub mod backfill;
pub mod initializer;
pub mod price_collect;
pub mod scheduler;

pub use aggregator::{build_candle, CandleAggregator, SampleIndex};
pub use backfill::BackfillOrchestrator;
pub use initializer::HistoryInitializer;
pub use price_collect::PriceCollector;
pub use scheduler::{run_daemon, until_next_minute};
