//! 데이터 모듈 오류 타입.

use ohlcv_core::PipelineError;
use thiserror::Error;

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 레코드를 찾을 수 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 잘못된 데이터 형식
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 마이그레이션 오류
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 데이터 삽입 오류
    #[error("Insert error: {0}")]
    InsertError(String),

    /// 데이터 가져오기 오류 (외부 소스)
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// 요청 타임아웃 (외부 소스)
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 외부 소스 요청 한도 초과 (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 파싱 오류
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl DataError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::FetchError(_)
                | DataError::Timeout(_)
                | DataError::RateLimited
                | DataError::ConnectionError(_)
                | DataError::PoolExhausted
        )
    }

    /// 외부 소스에서 발생한 에러인지 확인.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            DataError::FetchError(_)
                | DataError::Timeout(_)
                | DataError::RateLimited
                | DataError::ParseError(_)
        )
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::Database(db_err) => DataError::QueryError(db_err.message().to_string()),
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DataError::Timeout(err.to_string())
        } else if err.is_decode() {
            DataError::ParseError(err.to_string())
        } else {
            DataError::FetchError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::SerializationError(err.to_string())
    }
}

impl From<DataError> for PipelineError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => PipelineError::NotFound(msg),
            e if e.is_upstream() => PipelineError::Upstream(e.to_string()),
            e => PipelineError::Persistence(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ohlcv_core::ErrorKind;

    #[test]
    fn test_pipeline_error_mapping() {
        let err: PipelineError = DataError::InsertError("duplicate".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        let err: PipelineError = DataError::FetchError("503".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Upstream);

        let err: PipelineError = DataError::NotFound("asset".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_retryable() {
        assert!(DataError::RateLimited.is_retryable());
        assert!(DataError::Timeout("10s".to_string()).is_retryable());
        assert!(!DataError::ParseError("bad json".to_string()).is_retryable());
        assert!(!DataError::NotFound("pool".to_string()).is_retryable());
    }
}
