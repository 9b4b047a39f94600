//! 캔들 파이프라인의 에러 타입.
//!
//! API 계층은 `ErrorKind`를 보고 응답을 결정합니다:
//! Validation/NotFound → 요청 거부, Concurrency → 충돌,
//! Upstream/Persistence → 서버 에러 (구조화된 결과 포함).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 파이프라인 에러.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 잘못된 요청 (구간, 타임프레임 등)
    #[error("잘못된 요청: {0}")]
    Validation(String),

    /// 알 수 없거나 비활성 자산
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 재시도 예산을 모두 소진한 외부 소스 실패
    #[error("외부 소스 에러: {0}")]
    Upstream(String),

    /// 이미 백필이 실행 중
    #[error("이미 백필이 실행 중입니다")]
    Concurrency,

    /// 저장소 읽기/쓰기 실패
    #[error("저장소 에러: {0}")]
    Persistence(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),
}

/// 파이프라인 작업을 위한 Result 타입.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// 직렬화 가능한 에러 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Upstream,
    Concurrency,
    Persistence,
    Config,
}

impl PipelineError {
    /// 에러 분류를 반환합니다.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Upstream(_) => ErrorKind::Upstream,
            PipelineError::Concurrency => ErrorKind::Concurrency,
            PipelineError::Persistence(_) => ErrorKind::Persistence,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Upstream(_))
    }

    /// 요청 자체가 잘못되어 거부해야 하는 에러인지 확인합니다.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_) | PipelineError::NotFound(_)
        )
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(PipelineError::Upstream("503".to_string()).is_retryable());
        assert!(!PipelineError::Concurrency.is_retryable());
        assert!(!PipelineError::Persistence("disk full".to_string()).is_retryable());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(PipelineError::Concurrency.kind(), ErrorKind::Concurrency);
        assert_eq!(
            PipelineError::NotFound("token".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert!(PipelineError::Validation("start >= end".to_string()).is_rejection());
        assert!(!PipelineError::Upstream("timeout".to_string()).is_rejection());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
