//! Jupiter 가격 API 클라이언트.
//!
//! `GET {base}?ids=a,b,c` → `{ "<mint>": { "usdPrice": 1.23, ... }, ... }`

use async_trait::async_trait;
use ohlcv_core::{AssetId, Price, PriceFeedSettings};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::PriceFeed;
use crate::error::{DataError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceEntry {
    usd_price: Option<f64>,
}

/// Jupiter 가격 피드.
pub struct JupiterPriceClient {
    client: Client,
    base_url: String,
}

impl JupiterPriceClient {
    pub fn new(settings: &PriceFeedSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| DataError::FetchError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
        })
    }
}

#[async_trait]
impl PriceFeed for JupiterPriceClient {
    async fn fetch_prices(&self, asset_ids: &[AssetId]) -> Result<HashMap<AssetId, Price>> {
        if asset_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .query(&[("ids", asset_ids.join(","))])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DataError::RateLimited);
        }
        if !status.is_success() {
            return Err(DataError::FetchError(format!("Jupiter API 오류: {}", status)));
        }

        let entries: HashMap<String, Option<PriceEntry>> = response.json().await?;

        let prices: HashMap<AssetId, Price> = entries
            .into_iter()
            .filter_map(|(id, entry)| {
                let price = entry?.usd_price?;
                Decimal::try_from(price).ok().map(|p| (id, p))
            })
            .collect();

        debug!(requested = asset_ids.len(), received = prices.len(), "Jupiter 가격 조회");
        Ok(prices)
    }
}
