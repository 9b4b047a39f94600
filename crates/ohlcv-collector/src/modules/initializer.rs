//! 신규 자산 히스토리 초기화.
//!
//! 비활성 상태로 등록된 자산(`pending`)을 등록 순서대로 하나씩 꺼내, 최근
//! `history_days`일 구간을 백필한 뒤 활성화합니다. 진행률은 히스토리 페이지
//! 단위로 자산 정보에 기록됩니다.
//!
//! 백필과 같은 단일 실행 잠금을 쓰므로, 다른 백필이 실행 중이면 자산을
//! 대기 상태로 되돌리고 다음 주기에 다시 시도합니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ohlcv_core::{BackfillResult, BackfillWindow, Initialization, PipelineError, PipelineResult};
use ohlcv_data::{AssetDirectory, FetchProgress};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, instrument, warn};

use super::backfill::BackfillOrchestrator;
use crate::config::InitializerConfig;

/// 신규 자산 초기화기.
pub struct HistoryInitializer {
    orchestrator: Arc<BackfillOrchestrator>,
    assets: Arc<dyn AssetDirectory>,
    config: InitializerConfig,
}

impl HistoryInitializer {
    pub fn new(
        orchestrator: Arc<BackfillOrchestrator>,
        assets: Arc<dyn AssetDirectory>,
        config: InitializerConfig,
    ) -> Self {
        Self {
            orchestrator,
            assets,
            config,
        }
    }

    /// 대기열 확인 주기.
    pub fn poll_interval(&self) -> std::time::Duration {
        self.config.poll_interval
    }

    /// 대기 중인 자산 하나를 초기화합니다.
    ///
    /// 대기 자산이 없거나 다른 백필이 실행 중이면 `Ok(None)`.
    /// 백필이 끝까지 실행되면 성공 여부와 상관없이 그 결과를 돌려주며,
    /// 성공한 경우에만 자산이 활성화됩니다.
    #[instrument(skip(self))]
    pub async fn initialize_next(
        &self,
        now: DateTime<Utc>,
    ) -> PipelineResult<Option<BackfillResult>> {
        let Some(asset) = self.assets.next_pending().await? else {
            return Ok(None);
        };
        let asset_id = asset.asset_id;
        let window = BackfillWindow::last_days(now, self.config.history_days)?;

        info!(
            asset = %asset_id,
            symbol = %asset.symbol,
            days = self.config.history_days,
            "신규 자산 히스토리 초기화 시작"
        );
        self.assets
            .set_initialization(&asset_id, &Initialization::in_progress(0))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome, _) = tokio::join!(
            self.orchestrator.run_initial_load(&asset_id, window, Some(tx)),
            self.track_progress(&asset_id, rx),
        );

        match outcome {
            Err(PipelineError::Concurrency) => {
                debug!(asset = %asset_id, "다른 백필 실행 중, 다음 주기에 재시도");
                self.assets
                    .set_initialization(&asset_id, &Initialization::pending())
                    .await?;
                Ok(None)
            }
            Err(e) => {
                warn!(asset = %asset_id, error = %e, "신규 자산 초기화 실패");
                self.assets
                    .set_initialization(&asset_id, &Initialization::failed(e.to_string()))
                    .await?;
                Err(e)
            }
            Ok(result) if !result.success => {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "알 수 없는 에러".to_string());
                warn!(asset = %asset_id, error = %error, "신규 자산 초기화 실패");
                self.assets
                    .set_initialization(&asset_id, &Initialization::failed(error))
                    .await?;
                Ok(Some(result))
            }
            Ok(result) => {
                self.assets
                    .set_initialization(&asset_id, &Initialization::completed())
                    .await?;
                self.assets.activate(&asset_id).await?;
                info!(
                    asset = %asset_id,
                    samples = result.samples_inserted,
                    candles = result.candles_created,
                    "신규 자산 초기화 완료, 활성화"
                );
                Ok(Some(result))
            }
        }
    }

    /// 페이지 진행 상황을 자산 정보의 진행률로 옮깁니다. 완료(100)는 활성화 시에만 기록합니다.
    async fn track_progress(&self, asset_id: &str, mut rx: UnboundedReceiver<FetchProgress>) {
        let mut last = 0u8;
        while let Some(progress) = rx.recv().await {
            let percent = progress_percent(&progress);
            if percent == last {
                continue;
            }
            last = percent;

            debug!(asset = %asset_id, progress = percent, "초기화 진행");
            if let Err(e) = self
                .assets
                .set_initialization(asset_id, &Initialization::in_progress(percent))
                .await
            {
                warn!(asset = %asset_id, error = %e, "초기화 진행률 기록 실패");
            }
        }
    }
}

fn progress_percent(progress: &FetchProgress) -> u8 {
    if progress.pages_estimate == 0 {
        return 0;
    }
    (progress.page * 100 / progress.pages_estimate).min(99) as u8
}
