//! 백필 요청 및 결과 타입.
//!
//! 요청 구간과 결과는 호출자에게만 반환되며 저장되지 않습니다.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::types::{AssetId, Timeframe};

/// 백필 요청 구간 `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BackfillWindow {
    /// 명시적 날짜로 구간을 생성합니다.
    pub fn from_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> PipelineResult<Self> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    /// `now` 기준 최근 N시간.
    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> PipelineResult<Self> {
        Self::from_dates(now - Duration::hours(hours), now)
    }

    /// `now` 기준 최근 N일.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> PipelineResult<Self> {
        Self::from_dates(now - Duration::days(days), now)
    }

    /// 구간 유효성 검사.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.start >= self.end {
            return Err(PipelineError::Validation(format!(
                "start({})는 end({})보다 앞서야 합니다",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// 구간 길이.
    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// 시각이 구간 안에 있는지 확인합니다 (양끝 포함).
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// 타임프레임별 재계산 통계.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeStats {
    pub timeframe: Option<Timeframe>,
    /// 검사한 기간 수
    pub periods_checked: usize,
    /// 새로 만든 캔들 수 (기존 캔들 없음)
    pub created: usize,
    /// 품질 미달로 다시 만든 캔들 수
    pub recalculated: usize,
    /// 품질 충족으로 건너뛴 캔들 수
    pub skipped: usize,
    /// 샘플이 없어 만들지 못한 기간 수
    pub empty: usize,
}

impl TimeframeStats {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe: Some(timeframe),
            ..Default::default()
        }
    }
}

/// 단일 자산 백필 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillResult {
    pub asset_id: AssetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub window: BackfillWindow,
    /// 소스에서 받은 구간 내 분봉 수
    pub samples_from_source: usize,
    pub samples_inserted: usize,
    pub samples_skipped: usize,
    pub candles_created: usize,
    pub candles_recalculated: usize,
    pub candles_skipped: usize,
    pub timeframes: Vec<TimeframeStats>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl BackfillResult {
    /// 빈 성공 결과.
    pub fn new(asset_id: impl Into<AssetId>, window: BackfillWindow) -> Self {
        Self {
            asset_id: asset_id.into(),
            symbol: None,
            window,
            samples_from_source: 0,
            samples_inserted: 0,
            samples_skipped: 0,
            candles_created: 0,
            candles_recalculated: 0,
            candles_skipped: 0,
            timeframes: Vec::new(),
            success: true,
            error: None,
            error_kind: None,
            duration_ms: 0,
        }
    }

    /// 타임프레임 통계를 누적합니다.
    pub fn absorb(&mut self, stats: TimeframeStats) {
        self.candles_created += stats.created;
        self.candles_recalculated += stats.recalculated;
        self.candles_skipped += stats.skipped;
        self.timeframes.push(stats);
    }

    /// 실패로 표시합니다. 이미 누적된 진행 상황은 유지됩니다.
    pub fn fail(&mut self, err: &PipelineError) {
        self.success = false;
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind());
    }

    /// 결과 요약 로그 출력.
    pub fn log_summary(&self) {
        if self.success {
            tracing::info!(
                asset = %self.asset_id,
                symbol = ?self.symbol,
                samples_inserted = self.samples_inserted,
                samples_skipped = self.samples_skipped,
                candles_created = self.candles_created,
                candles_recalculated = self.candles_recalculated,
                candles_skipped = self.candles_skipped,
                elapsed = format!("{:.1}s", self.duration_ms as f64 / 1000.0),
                "백필 완료"
            );
        } else {
            tracing::error!(
                asset = %self.asset_id,
                symbol = ?self.symbol,
                error = ?self.error,
                elapsed = format!("{:.1}s", self.duration_ms as f64 / 1000.0),
                "백필 실패"
            );
        }
    }
}

/// 전체 자산 백필 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    pub window: BackfillWindow,
    pub total_assets: usize,
    pub successful: usize,
    pub failed: usize,
    pub per_asset: Vec<BackfillResult>,
}

impl BackfillSummary {
    /// 자산별 결과로부터 요약을 만듭니다.
    pub fn from_results(window: BackfillWindow, per_asset: Vec<BackfillResult>) -> Self {
        let successful = per_asset.iter().filter(|r| r.success).count();
        Self {
            window,
            total_assets: per_asset.len(),
            successful,
            failed: per_asset.len() - successful,
            per_asset,
        }
    }
}

/// 백필 상태 조회 결과.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillStatus {
    pub is_running: bool,
    pub quality_threshold: f64,
}
