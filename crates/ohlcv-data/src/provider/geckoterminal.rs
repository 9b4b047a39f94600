//! GeckoTerminal 공개 API 클라이언트.
//!
//! - 토큰 정보: `GET /networks/{network}/tokens/{address}` → top_pools[0]
//! - 분봉: `GET /networks/{network}/pools/{pool}/ohlcv/minute?aggregate=1&before_timestamp=..&limit=..`
//!
//! 분봉 응답은 `[unix초, open, high, low, close, volume]` 배열의 목록이며
//! 최신 순으로 정렬되어 있습니다.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ohlcv_core::{HistoryBar, HistorySettings};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::HistorySource;
use crate::error::{DataError, Result};

/// GeckoTerminal 클라이언트.
pub struct GeckoTerminalClient {
    client: Client,
    base_url: String,
    network: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: TokenData,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    relationships: Option<TokenRelationships>,
}

#[derive(Debug, Deserialize)]
struct TokenRelationships {
    top_pools: Option<PoolList>,
}

#[derive(Debug, Deserialize)]
struct PoolList {
    data: Vec<PoolRef>,
}

#[derive(Debug, Deserialize)]
struct PoolRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OhlcvResponse {
    data: OhlcvData,
}

#[derive(Debug, Deserialize)]
struct OhlcvData {
    attributes: OhlcvAttributes,
}

#[derive(Debug, Deserialize)]
struct OhlcvAttributes {
    ohlcv_list: Vec<Vec<Value>>,
}

impl GeckoTerminalClient {
    /// 설정으로부터 클라이언트를 생성합니다.
    pub fn new(settings: &HistorySettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| DataError::FetchError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            network: settings.network.clone(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!(url, "GeckoTerminal 요청");

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DataError::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(DataError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::FetchError(format!(
                "GeckoTerminal API 오류 {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| DataError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl HistorySource for GeckoTerminalClient {
    async fn resolve_venue(&self, asset_id: &str) -> Result<String> {
        let url = format!("{}/networks/{}/tokens/{}", self.base_url, self.network, asset_id);
        let response: TokenResponse = self.get_json(&url, &[]).await?;

        let pool = response
            .data
            .relationships
            .and_then(|r| r.top_pools)
            .and_then(|p| p.data.into_iter().next())
            .ok_or_else(|| DataError::NotFound(format!("{}의 거래 풀 없음", asset_id)))?;

        let prefix = format!("{}_", self.network);
        let pool_id = pool
            .id
            .strip_prefix(&prefix)
            .unwrap_or(&pool.id)
            .to_string();

        debug!(asset = asset_id, pool = %pool_id, "주 거래 풀 확인");
        Ok(pool_id)
    }

    async fn fetch_history(
        &self,
        venue_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryBar>> {
        let url = format!(
            "{}/networks/{}/pools/{}/ohlcv/minute",
            self.base_url, self.network, venue_id
        );
        let query = [
            ("aggregate", "1".to_string()),
            ("before_timestamp", before.timestamp().to_string()),
            ("limit", limit.to_string()),
        ];

        let response: OhlcvResponse = self.get_json(&url, &query).await?;

        response
            .data
            .attributes
            .ohlcv_list
            .iter()
            .map(|row| parse_bar(row))
            .collect()
    }
}

/// `[ts, o, h, l, c, v]` 배열을 분봉으로 변환합니다.
fn parse_bar(row: &[Value]) -> Result<HistoryBar> {
    if row.len() < 6 {
        return Err(DataError::ParseError(format!("분봉 필드 부족: {:?}", row)));
    }

    let secs = row[0]
        .as_i64()
        .or_else(|| row[0].as_f64().map(|f| f as i64))
        .ok_or_else(|| DataError::ParseError(format!("잘못된 타임스탬프: {}", row[0])))?;
    let timestamp = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| DataError::ParseError(format!("범위 밖 타임스탬프: {}", secs)))?;

    Ok(HistoryBar {
        timestamp,
        open: number(&row[1])?,
        high: number(&row[2])?,
        low: number(&row[3])?,
        close: number(&row[4])?,
        volume: number(&row[5])?,
    })
}

fn number(value: &Value) -> Result<Decimal> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .ok_or_else(|| DataError::ParseError(format!("잘못된 숫자: {}", n))),
        Value::String(s) => s
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(s))
            .map_err(|e| DataError::ParseError(e.to_string())),
        other => Err(DataError::ParseError(format!("숫자가 아님: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn client(server: &mockito::ServerGuard) -> GeckoTerminalClient {
        GeckoTerminalClient::new(&HistorySettings {
            base_url: server.url(),
            request_timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_bar() {
        let row = vec![
            json!(1_761_004_800),
            json!(1.5),
            json!(2.0),
            json!("1.25"),
            json!(1.75),
            json!(1000.0),
        ];
        let bar = parse_bar(&row).unwrap();
        assert_eq!(bar.timestamp.timestamp(), 1_761_004_800);
        assert_eq!(bar.low, dec!(1.25));
        assert_eq!(bar.close, dec!(1.75));

        assert!(parse_bar(&row[..3]).is_err());
    }

    #[tokio::test]
    async fn test_resolve_venue_strips_network_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/networks/solana/tokens/TokenMint")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": {
                        "relationships": {
                            "top_pools": { "data": [ { "id": "solana_PoolA" }, { "id": "solana_PoolB" } ] }
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let venue = client(&server).resolve_venue("TokenMint").await.unwrap();
        assert_eq!(venue, "PoolA");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_venue_without_pools() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/networks/solana/tokens/Lonely")
            .with_status(200)
            .with_body(json!({ "data": { "relationships": { "top_pools": { "data": [] } } } }).to_string())
            .create_async()
            .await;

        let err = client(&server).resolve_venue("Lonely").await.unwrap_err();
        assert!(matches!(err, DataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_history_page() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/networks/solana/pools/PoolA/ohlcv/minute")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("aggregate".into(), "1".into()),
                Matcher::UrlEncoded("before_timestamp".into(), "1761004800".into()),
                Matcher::UrlEncoded("limit".into(), "1000".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "data": { "attributes": { "ohlcv_list": [
                        [1_761_004_740, 1.0, 1.1, 0.9, 1.05, 10.0],
                        [1_761_004_680, 0.95, 1.0, 0.9, 1.0, 12.0]
                    ] } }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let before = Utc.timestamp_opt(1_761_004_800, 0).unwrap();
        let bars = client(&server)
            .fetch_history("PoolA", before, 1000)
            .await
            .unwrap();

        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp > bars[1].timestamp);
        assert_eq!(bars[0].close, dec!(1.05));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let before = Utc.timestamp_opt(1_761_004_800, 0).unwrap();
        let err = client(&server)
            .fetch_history("PoolA", before, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::RateLimited));
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = client(&server).resolve_venue("x").await.unwrap_err();
        assert!(matches!(err, DataError::FetchError(_)));
        assert!(err.is_retryable());
    }
}
