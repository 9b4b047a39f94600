//! 시장 데이터 타입 및 구조체.
//!
//! 이 모듈은 시장 데이터 관련 타입을 정의합니다:
//! - `PriceSample` / `SamplePoint` - 원시 가격 틱
//! - `Measurement` - 원시 샘플 종류
//! - `Candle` - 지표가 붙은 OHLCV 캔들
//! - `HistoryBar` - 외부 소스에서 받은 분봉

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{AssetId, Price, Timeframe};

/// 원시 샘플 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    /// 원시 가격 (`raw_prices`)
    RawPrice,
    /// 원시 거래량 (`raw_volumes`)
    RawVolume,
}

impl Measurement {
    /// 저장소에서 사용하는 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            Measurement::RawPrice => "raw_prices",
            Measurement::RawVolume => "raw_volumes",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 원시 가격 틱.
///
/// (asset_id, timestamp)로 유일하며 한 번 기록되면 변경/삭제되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    /// 자산 식별자
    pub asset_id: AssetId,
    /// 수집 시각
    pub timestamp: DateTime<Utc>,
    /// 가격
    pub price: Price,
}

impl PriceSample {
    /// 새 가격 샘플을 생성합니다.
    pub fn new(asset_id: impl Into<AssetId>, timestamp: DateTime<Utc>, price: Price) -> Self {
        Self {
            asset_id: asset_id.into(),
            timestamp,
            price,
        }
    }

    /// 저장소 포인트로 변환합니다.
    pub fn to_point(&self) -> SamplePoint {
        SamplePoint::new(self.timestamp, self.price)
    }
}

/// 저장소에서 읽은 시계열 포인트.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

impl SamplePoint {
    pub fn new(timestamp: DateTime<Utc>, value: Decimal) -> Self {
        Self { timestamp, value }
    }
}

/// 외부 히스토리 소스에서 받은 분봉.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBar {
    /// 봉 시작 시각
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
}

/// 지표가 붙은 OHLCV 캔들.
///
/// (asset_id, timeframe, period_end)당 하나의 논리 버전만 존재하며,
/// 재계산 시 같은 키에 덮어씁니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 자산 식별자
    pub asset_id: AssetId,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 기간 종료 시각 (그리드 정렬)
    pub period_end: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: Decimal,
    /// 샘플 커버리지 품질 (0~1)
    pub quality_factor: f64,
    /// RSI14 (히스토리 부족 시 None)
    pub rsi: Option<Decimal>,
    /// RSI 품질 (0~1)
    pub rsi_quality: f64,
    /// EMA14 (히스토리 부족 시 None)
    pub ema: Option<Decimal>,
}

impl Candle {
    /// 지표 없는 OHLC 캔들을 생성합니다.
    ///
    /// `quality_factor`는 [0, 1]로 클램프됩니다.
    #[allow(clippy::too_many_arguments)]
    pub fn shell(
        asset_id: impl Into<AssetId>,
        timeframe: Timeframe,
        period_end: DateTime<Utc>,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Decimal,
        quality_factor: f64,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            timeframe,
            period_end,
            open,
            high,
            low,
            close,
            volume,
            quality_factor: clamp_unit(quality_factor),
            rsi: None,
            rsi_quality: 0.0,
            ema: None,
        }
    }

    /// 지표 값을 설정합니다.
    ///
    /// `rsi`는 [0, 100], `rsi_quality`는 [0, 1]로 클램프됩니다.
    pub fn set_indicators(&mut self, rsi: Option<Decimal>, rsi_quality: f64, ema: Option<Decimal>) {
        self.rsi = rsi.map(|v| v.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED));
        self.rsi_quality = if self.rsi.is_some() {
            clamp_unit(rsi_quality)
        } else {
            0.0
        };
        self.ema = ema;
    }

    /// 기간 시작 시각 (배타적 하한).
    pub fn period_start(&self) -> DateTime<Utc> {
        self.timeframe.period_start(self.period_end)
    }

    /// 두 품질 지표가 모두 임계값 이상인지 확인합니다.
    pub fn meets_quality(&self, threshold: f64) -> bool {
        self.quality_factor >= threshold && self.rsi_quality >= threshold
    }
}

/// [0, 1] 범위로 클램프. NaN은 0으로 취급합니다.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_candle(quality: f64) -> Candle {
        Candle::shell(
            "So11111111111111111111111111111111111111112",
            Timeframe::M5,
            Utc.with_ymd_and_hms(2025, 10, 21, 12, 5, 0).unwrap(),
            dec!(1.0),
            dec!(1.2),
            dec!(0.9),
            dec!(1.1),
            Decimal::ZERO,
            quality,
        )
    }

    #[test]
    fn test_shell_clamps_quality() {
        assert_eq!(sample_candle(1.7).quality_factor, 1.0);
        assert_eq!(sample_candle(-0.2).quality_factor, 0.0);
        assert_eq!(sample_candle(f64::NAN).quality_factor, 0.0);
    }

    #[test]
    fn test_set_indicators_clamps() {
        let mut candle = sample_candle(1.0);
        candle.set_indicators(Some(dec!(120)), 1.5, Some(dec!(1.05)));
        assert_eq!(candle.rsi, Some(dec!(100)));
        assert_eq!(candle.rsi_quality, 1.0);

        candle.set_indicators(None, 0.8, None);
        assert_eq!(candle.rsi, None);
        assert_eq!(candle.rsi_quality, 0.0);
    }

    #[test]
    fn test_meets_quality_requires_both() {
        let mut candle = sample_candle(0.95);
        candle.set_indicators(Some(dec!(55)), 0.5, None);
        assert!(!candle.meets_quality(0.9));

        candle.set_indicators(Some(dec!(55)), 0.92, None);
        assert!(candle.meets_quality(0.9));
    }

    #[test]
    fn test_period_start() {
        let candle = sample_candle(1.0);
        assert_eq!(
            candle.period_start(),
            Utc.with_ymd_and_hms(2025, 10, 21, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_measurement_names() {
        assert_eq!(Measurement::RawPrice.as_str(), "raw_prices");
        assert_eq!(Measurement::RawVolume.to_string(), "raw_volumes");
    }
}
