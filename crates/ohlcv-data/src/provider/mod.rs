//! 외부 가격 소스.
//!
//! ## 히스토리 소스
//! - `HistorySource`: 주 거래 풀 해석 + 분봉 히스토리 페이지 조회
//! - `GeckoTerminalClient`: GeckoTerminal 공개 API
//!
//! ## 실시간 가격 피드
//! - `PriceFeed`: 여러 자산의 현재 가격을 한 번에 조회
//! - `JupiterPriceClient`: Jupiter 가격 API

pub mod geckoterminal;
pub mod jupiter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ohlcv_core::{AssetId, HistoryBar, Price};
use std::collections::HashMap;

use crate::error::Result;

pub use geckoterminal::GeckoTerminalClient;
pub use jupiter::JupiterPriceClient;

/// 분봉 히스토리 소스.
///
/// 요청 간격 제한과 재시도는 `RateLimitedHistoryFetcher`가 담당하므로
/// 구현체는 HTTP 429를 `DataError::RateLimited`로 보고하기만 하면 됩니다.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// 자산의 주 거래 풀 ID를 찾습니다.
    async fn resolve_venue(&self, asset_id: &str) -> Result<String>;

    /// `before` 이전의 분봉을 최대 `limit`개 조회합니다.
    ///
    /// 순서는 구현체마다 다를 수 있으며, 더 이상 데이터가 없으면 빈 벡터를 반환합니다.
    async fn fetch_history(
        &self,
        venue_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryBar>>;
}

/// 실시간 가격 피드.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// 자산별 현재 가격. 가격이 없는 자산은 결과에서 빠집니다.
    async fn fetch_prices(&self, asset_ids: &[AssetId]) -> Result<HashMap<AssetId, Price>>;
}
