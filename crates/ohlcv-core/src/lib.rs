//! # OHLCV Core
//!
//! 캔들 수집기의 핵심 도메인 모델 및 타입을 제공합니다:
//! - 타임프레임 그리드
//! - 원시 가격 샘플과 캔들
//! - 추적 자산
//! - 백필 요청/결과
//! - 에러 분류
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
