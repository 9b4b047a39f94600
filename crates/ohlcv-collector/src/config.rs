//! 설정 파일 + 환경변수 기반 설정 모듈.

use std::path::Path;
use std::time::Duration;

use ohlcv_core::{AppConfig, LogConfig, Timeframe};
use ohlcv_data::{FetcherConfig, RetryPolicy};

use crate::Result;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 공용 설정 (DB, 로깅, 수집, 백필, 외부 API)
    pub app: AppConfig,
    /// 집계 설정
    pub aggregation: AggregationConfig,
    /// 백필 설정
    pub backfill: BackfillConfig,
    /// 신규 자산 초기화 설정
    pub initializer: InitializerConfig,
    /// 데몬 모드 설정
    pub daemon: DaemonConfig,
}

/// 캔들 집계 설정
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    /// 집계할 타임프레임 (작은 것부터)
    pub timeframes: Vec<Timeframe>,
    /// 원시 샘플의 명목 간격
    pub sample_interval: Duration,
    /// 캔들 거래량에 raw_volumes 합을 쓸지 여부
    pub include_volume: bool,
    /// 지표 계산에 쓰는 이전 기간 수 (현재 캔들 제외)
    pub indicator_lookback: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for AggregationConfig {
    fn from(app: &AppConfig) -> Self {
        let mut timeframes = app.collector.timeframes.clone();
        timeframes.sort();
        timeframes.dedup();

        Self {
            timeframes,
            sample_interval: app.collector.sample_interval(),
            include_volume: app.collector.include_volume,
            indicator_lookback: app.backfill.indicator_lookback,
        }
    }
}

/// 백필 설정
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillConfig {
    /// 이 값 미만 품질의 캔들은 다시 만듭니다
    pub quality_threshold: f64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.90,
        }
    }
}

/// 신규 자산 히스토리 초기화 설정
#[derive(Debug, Clone, PartialEq)]
pub struct InitializerConfig {
    /// 초기화 시 가져올 히스토리 일 수
    pub history_days: i64,
    /// 대기열 확인 주기
    pub poll_interval: Duration,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for InitializerConfig {
    fn from(app: &AppConfig) -> Self {
        Self {
            history_days: app.initializer.history_days,
            poll_interval: app.initializer.poll_interval(),
        }
    }
}

/// 데몬 모드 설정
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// 집계 주기 (분 경계에 맞춰 시작)
    pub tick_interval: Duration,
    /// 실시간 가격 수집 주기
    pub price_interval: Duration,
    /// 실시간 가격 수집 활성화
    pub price_collection: bool,
    /// 신규 자산 초기화 대기열 처리
    pub initialization: bool,
}

impl CollectorConfig {
    /// `.env`를 읽은 뒤 설정 파일(선택)과 환경변수에서 설정 로드
    ///
    /// 경로가 없으면 `config/default.toml`이 있을 때만 사용합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let app = match path {
            Some(path) => AppConfig::load(Some(path))?,
            None => AppConfig::load_default()?,
        };
        Ok(Self::from_app(app))
    }

    /// 이미 로드된 공용 설정으로부터 생성
    pub fn from_app(app: AppConfig) -> Self {
        let aggregation = AggregationConfig::from(&app);
        let backfill = BackfillConfig {
            quality_threshold: app.backfill.quality_threshold,
        };
        let daemon = DaemonConfig {
            tick_interval: app.collector.tick_interval(),
            price_interval: app.collector.sample_interval(),
            price_collection: app.collector.price_collection,
            initialization: app.initializer.enabled,
        };
        let initializer = InitializerConfig::from(&app);

        Self {
            app,
            aggregation,
            backfill,
            initializer,
            daemon,
        }
    }

    /// 히스토리 수집기 설정
    pub fn fetcher(&self) -> FetcherConfig {
        FetcherConfig::from(&self.app.history)
    }

    /// 외부 호출 재시도 정책
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::from(&self.app.backfill)
    }

    /// 로깅 설정
    pub fn logging(&self) -> LogConfig {
        LogConfig::from_settings(&self.app.logging)
    }
}
