//! 추적 대상 자산.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::AssetId;

/// 신규 자산의 히스토리 초기화 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationStatus {
    /// 초기화 대기 (비활성 상태로 등록됨)
    Pending,
    /// 히스토리 수집 중
    InProgress,
    /// 초기화 완료 또는 초기화가 필요 없는 자산
    #[default]
    Completed,
    /// 초기화 실패
    Failed,
}

impl InitializationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for InitializationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitializationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("알 수 없는 초기화 상태: {}", s)),
        }
    }
}

/// 초기화 상태와 진행률.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialization {
    pub status: InitializationStatus,
    /// 0~100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for Initialization {
    fn default() -> Self {
        Self::completed()
    }
}

impl Initialization {
    pub fn pending() -> Self {
        Self {
            status: InitializationStatus::Pending,
            progress: 0,
            error: None,
        }
    }

    pub fn in_progress(progress: u8) -> Self {
        Self {
            status: InitializationStatus::InProgress,
            progress: progress.min(100),
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: InitializationStatus::Completed,
            progress: 100,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: InitializationStatus::Failed,
            progress: 0,
            error: Some(error.into()),
        }
    }
}

/// 가격을 수집하고 캔들을 만드는 대상 자산.
///
/// 자산 목록 자체는 토큰 관리 쪽에서 관리합니다. 이 크레이트가 기록하는 것은
/// 처음 해석한 주 거래 풀 ID(`venue_id`)와, 신규 자산의 초기화 상태 및 활성화뿐입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedAsset {
    /// 자산 식별자 (컨트랙트 주소)
    pub asset_id: AssetId,
    /// 표시용 심볼
    pub symbol: String,
    /// 주 거래 풀 ID (해석 전에는 None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<String>,
    /// 활성 여부
    pub is_active: bool,
    #[serde(default)]
    pub initialization: Initialization,
}

impl TrackedAsset {
    /// 활성 상태의 새 자산.
    pub fn new(asset_id: impl Into<AssetId>, symbol: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            symbol: symbol.into(),
            venue_id: None,
            is_active: true,
            initialization: Initialization::completed(),
        }
    }

    /// 히스토리 초기화를 기다리는 비활성 자산.
    pub fn pending(asset_id: impl Into<AssetId>, symbol: impl Into<String>) -> Self {
        Self {
            is_active: false,
            initialization: Initialization::pending(),
            ..Self::new(asset_id, symbol)
        }
    }

    /// 거래 풀 ID를 지정합니다.
    pub fn with_venue(mut self, venue_id: impl Into<String>) -> Self {
        self.venue_id = Some(venue_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            InitializationStatus::Pending,
            InitializationStatus::InProgress,
            InitializationStatus::Completed,
            InitializationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InitializationStatus>(), Ok(status));
        }
        assert!("done".parse::<InitializationStatus>().is_err());
    }

    #[test]
    fn test_pending_asset_is_inactive() {
        let asset = TrackedAsset::pending("Mint", "NEW");
        assert!(!asset.is_active);
        assert_eq!(asset.initialization.status, InitializationStatus::Pending);
        assert_eq!(asset.initialization.progress, 0);

        assert_eq!(Initialization::in_progress(250).progress, 100);
        assert_eq!(TrackedAsset::new("A", "AAA").initialization, Initialization::completed());
    }
}
