//! 요청 간격 제한과 재시도를 적용한 히스토리 수집기.
//!
//! - 모든 요청 사이에 최소 간격(기본 2초)을 둡니다.
//! - HTTP 429를 받으면 고정 대기(기본 60초) 후 같은 요청을 다시 보냅니다.
//!   이 경로는 재시도 횟수에 포함되지 않습니다.
//! - 그 외 재시도 가능한 실패는 `RetryPolicy`로 제한된 횟수만큼 재시도합니다.
//! - 페이지는 `now`부터 과거 방향으로 `before` 커서를 옮기며 받고,
//!   결과는 오래된 순으로 돌려줍니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ohlcv_core::{HistoryBar, HistorySettings};
use serde::Serialize;
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DataError, Result};
use crate::provider::HistorySource;
use crate::retry::RetryPolicy;

/// 최신 분봉과 현재 시각의 차이가 이 값을 넘으면 경고.
const STALE_GAP_MINUTES: i64 = 60;

/// 페이지 단위 진행 상황.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchProgress {
    /// 지금까지 받은 페이지 수
    pub page: usize,
    /// 예상 총 페이지 수
    pub pages_estimate: usize,
    /// 지금까지 받은 분봉 수
    pub bars_so_far: usize,
}

/// 수집기 설정.
#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    pub page_limit: usize,
    pub min_request_spacing: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::from(&HistorySettings::default())
    }
}

impl From<&HistorySettings> for FetcherConfig {
    fn from(settings: &HistorySettings) -> Self {
        Self {
            page_limit: settings.page_limit.max(1),
            min_request_spacing: Duration::from_millis(settings.min_request_spacing_ms),
            rate_limit_cooldown: Duration::from_secs(settings.rate_limit_cooldown_secs),
        }
    }
}

/// 요청 간격 제한 히스토리 수집기.
pub struct RateLimitedHistoryFetcher {
    source: Arc<dyn HistorySource>,
    config: FetcherConfig,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimitedHistoryFetcher {
    pub fn new(source: Arc<dyn HistorySource>, config: FetcherConfig, retry: RetryPolicy) -> Self {
        Self {
            source,
            config,
            retry,
            last_request: Mutex::new(None),
        }
    }

    /// 자산의 주 거래 풀 ID를 찾습니다.
    pub async fn resolve_venue(&self, asset_id: &str) -> Result<String> {
        self.retry
            .run("resolve_venue", || {
                self.paced(|| self.source.resolve_venue(asset_id))
            })
            .await
    }

    /// `[start, now]` 구간의 분봉을 오래된 순으로 가져옵니다.
    ///
    /// 빈 페이지를 받거나 커서가 `start`에 도달하면 멈춥니다.
    /// `progress`가 있으면 페이지마다 한 번 진행 상황을 보냅니다.
    pub async fn fetch_range(
        &self,
        venue_id: &str,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
        progress: Option<&UnboundedSender<FetchProgress>>,
    ) -> Result<Vec<HistoryBar>> {
        let limit = self.config.page_limit;
        let minutes_needed = (now - start).num_minutes().max(0) as usize;
        let pages_estimate = minutes_needed.div_ceil(limit).max(1);

        info!(
            venue = venue_id,
            start = %start.to_rfc3339(),
            end = %now.to_rfc3339(),
            pages_estimate,
            "히스토리 수집 시작"
        );

        let mut bars: Vec<HistoryBar> = Vec::new();
        let mut before = now;
        let mut page = 0;

        while before > start {
            let batch = self
                .retry
                .run("fetch_history", || {
                    self.paced(|| self.source.fetch_history(venue_id, before, limit))
                })
                .await?;

            let Some(oldest) = batch.iter().map(|b| b.timestamp).min() else {
                info!(venue = venue_id, bars = bars.len(), "더 이상 히스토리 없음");
                break;
            };

            page += 1;
            bars.extend(batch);

            if let Some(tx) = progress {
                // 수신측이 닫혀도 수집은 계속
                let _ = tx.send(FetchProgress {
                    page,
                    pages_estimate,
                    bars_so_far: bars.len(),
                });
            }

            debug!(page, pages_estimate, bars = bars.len(), oldest = %oldest, "페이지 수신");

            if oldest >= before {
                warn!(venue = venue_id, cursor = %before, "커서가 이동하지 않음, 수집 중단");
                break;
            }
            before = oldest;
        }

        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);

        report_coverage(venue_id, &bars, now);
        Ok(bars)
    }

    /// 최소 간격을 지키고 429에 대해 무기한 재요청합니다.
    async fn paced<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            self.wait_turn().await;
            match op().await {
                Err(DataError::RateLimited) => {
                    warn!(
                        cooldown_secs = self.config.rate_limit_cooldown.as_secs(),
                        "요청 한도 초과(429), 대기 후 재요청"
                    );
                    tokio::time::sleep(self.config.rate_limit_cooldown).await;
                }
                other => return other,
            }
        }
    }

    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.config.min_request_spacing {
                tokio::time::sleep(self.config.min_request_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn report_coverage(venue_id: &str, bars: &[HistoryBar], now: DateTime<Utc>) {
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return;
    };

    info!(
        venue = venue_id,
        bars = bars.len(),
        from = %first.timestamp.to_rfc3339(),
        to = %last.timestamp.to_rfc3339(),
        "히스토리 수집 완료"
    );

    let gap_minutes = (now - last.timestamp).num_minutes();
    if gap_minutes > STALE_GAP_MINUTES {
        warn!(
            venue = venue_id,
            gap = format!("{}h{}m", gap_minutes / 60, gap_minutes % 60),
            "히스토리 끝과 현재 사이에 갭, 실시간 수집으로 채워야 함"
        );
    } else if gap_minutes > 0 {
        debug!(venue = venue_id, gap_minutes, "현재와의 간격");
    }
}
