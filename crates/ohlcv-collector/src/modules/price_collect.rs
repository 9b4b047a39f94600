//! 실시간 가격 수집.
//!
//! 모든 활성 자산의 현재 가격을 한 번에 조회하고, 같은 타임스탬프로
//! 자산마다 `raw_prices` 샘플 하나씩 기록합니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ohlcv_core::{AssetId, Measurement, PriceSample};
use ohlcv_data::{AssetDirectory, PriceFeed, SampleStore};
use tracing::{debug, warn};

use crate::stats::PriceCollectStats;

/// 실시간 가격 수집기.
pub struct PriceCollector {
    feed: Arc<dyn PriceFeed>,
    samples: Arc<dyn SampleStore>,
    assets: Arc<dyn AssetDirectory>,
}

impl PriceCollector {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        samples: Arc<dyn SampleStore>,
        assets: Arc<dyn AssetDirectory>,
    ) -> Self {
        Self {
            feed,
            samples,
            assets,
        }
    }

    /// 한 회차 수집. 실패는 로그와 통계에만 남습니다.
    pub async fn collect_once(&self, now: DateTime<Utc>) -> PriceCollectStats {
        let mut stats = PriceCollectStats::default();

        let assets = match self.assets.list_active_assets().await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(error = %e, "추적 자산 조회 실패");
                stats.errors += 1;
                return stats;
            }
        };
        if assets.is_empty() {
            return stats;
        }

        let ids: Vec<AssetId> = assets.into_iter().map(|a| a.asset_id).collect();
        stats.requested = ids.len();

        let prices = match self.feed.fetch_prices(&ids).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(assets = ids.len(), error = %e, "가격 조회 실패");
                stats.errors += 1;
                return stats;
            }
        };

        for id in &ids {
            let Some(price) = prices.get(id) else {
                debug!(asset = %id, "가격 없음");
                stats.missing += 1;
                continue;
            };

            let sample = PriceSample::new(id.clone(), now, *price);
            match self
                .samples
                .write_sample(Measurement::RawPrice, &sample.asset_id, sample.to_point())
                .await
            {
                Ok(_) => stats.stored += 1,
                Err(e) => {
                    warn!(asset = %id, error = %e, "가격 샘플 저장 실패");
                    stats.errors += 1;
                }
            }
        }

        debug!(
            requested = stats.requested,
            stored = stats.stored,
            missing = stats.missing,
            "실시간 가격 수집"
        );
        stats
    }
}
