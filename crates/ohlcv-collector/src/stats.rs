//! 수집 통계 구조체.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 실시간 집계 한 회차의 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationStats {
    /// 처리한 (자산, 타임프레임) 수
    pub total: usize,
    /// 저장한 캔들 수
    pub built: usize,
    /// 샘플이 없어 건너뛴 수
    pub empty: usize,
    /// 에러 수
    pub errors: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl AggregationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            ((self.built + self.empty) as f64 / self.total as f64) * 100.0
        }
    }

    /// 다른 회차 통계를 더합니다.
    pub fn merge(&mut self, other: &AggregationStats) {
        self.total += other.total;
        self.built += other.built;
        self.empty += other.empty;
        self.errors += other.errors;
        self.elapsed += other.elapsed;
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            built = self.built,
            empty = self.empty,
            errors = self.errors,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "집계 완료"
        );
    }
}

/// 실시간 가격 수집 한 회차의 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceCollectStats {
    /// 요청한 자산 수
    pub requested: usize,
    /// 저장한 샘플 수
    pub stored: usize,
    /// 가격이 없던 자산 수
    pub missing: usize,
    /// 저장 실패 수
    pub errors: usize,
}
