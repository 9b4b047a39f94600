//! 데이터 관리 및 저장.
//!
//! 이 crate는 다음을 제공합니다:
//! - 원시 샘플/캔들/추적 자산 저장소 (TimescaleDB, 인메모리)
//! - 외부 가격 소스 (GeckoTerminal 히스토리, Jupiter 실시간 가격)
//! - 요청 간격 제한과 재시도를 적용한 히스토리 수집기

pub mod error;
pub mod fetcher;
pub mod provider;
pub mod retry;
pub mod storage;

pub use error::{DataError, Result};
pub use fetcher::{FetchProgress, FetcherConfig, RateLimitedHistoryFetcher};
pub use provider::{GeckoTerminalClient, HistorySource, JupiterPriceClient, PriceFeed};
pub use retry::RetryPolicy;
pub use storage::memory::{MemoryAssetDirectory, MemoryStore};
pub use storage::timescale::{AssetRecord, CandleRecord, Database, TimescaleStore};
pub use storage::{AssetDirectory, CandleStore, RunLease, RunLock, SampleStore};
