//! 외부 호출 재시도 (지수 백오프).

use std::future::Future;
use std::time::Duration;

use ohlcv_core::BackfillSettings;
use tracing::warn;

use crate::error::{DataError, Result};

/// 재시도 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 첫 재시도 전 대기
    pub base_delay: Duration,
    /// 재시도마다 곱해지는 배수
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

impl From<&BackfillSettings> for RetryPolicy {
    fn from(settings: &BackfillSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.backoff_multiplier.max(1),
        }
    }
}

impl RetryPolicy {
    /// `attempt`번째 실패(1부터) 후 대기 시간: `base × multiplier^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// 재시도 가능한 에러에 대해 `op`를 최대 `max_attempts`번 실행합니다.
    ///
    /// 재시도할 수 없는 에러는 즉시 반환하고, 시도를 모두 소진하면 마지막 에러를 반환합니다.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "외부 호출 실패, 재시도 대기"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(exhausted(label, attempt, e)),
            }
        }
    }
}

fn exhausted(label: &str, attempts: u32, err: DataError) -> DataError {
    if err.is_retryable() {
        warn!(operation = label, attempts, error = %err, "재시도 한도 초과");
    }
    err
}
