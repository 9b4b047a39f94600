//! 캔들 집계를 위한 타임프레임 정의.
//!
//! 모든 타임프레임은 UTC 기준 고정 그리드에 정렬됩니다.
//! 기간 길이가 모두 하루의 약수이므로 epoch 밀리초를 기간 길이로 나눈 나머지가
//! 0이면 그리드 경계입니다 (예: 1h → 분 == 0, 4h → 시 % 4 == 0 && 분 == 0).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 캔들 타임프레임.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// 지원하는 모든 타임프레임 (짧은 것부터).
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// 이 타임프레임의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::from_secs(60),
            Timeframe::M5 => Duration::from_secs(5 * 60),
            Timeframe::M15 => Duration::from_secs(15 * 60),
            Timeframe::H1 => Duration::from_secs(60 * 60),
            Timeframe::H4 => Duration::from_secs(4 * 60 * 60),
            Timeframe::D1 => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// 밀리초 단위 기간.
    pub fn as_millis(&self) -> i64 {
        self.duration().as_millis() as i64
    }

    /// 분 단위 기간.
    pub fn as_minutes(&self) -> i64 {
        self.as_millis() / 60_000
    }

    /// chrono 기간.
    pub fn chrono_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.as_millis())
    }

    /// 문자열 표현 ("1m", "4h" 등).
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// `ts`가 이 타임프레임의 기간 종료 경계인지 확인합니다.
    ///
    /// 라이브 스케줄러가 매 분 호출하여 어떤 타임프레임의 캔들을 만들지 결정합니다.
    pub fn is_period_boundary(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_millis().rem_euclid(self.as_millis()) == 0
    }

    /// `ts` 이하의 가장 가까운 그리드 경계.
    pub fn align_down(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let rem = ts.timestamp_millis().rem_euclid(self.as_millis());
        ts - chrono::Duration::milliseconds(rem)
    }

    /// `ts` 이상의 가장 가까운 그리드 경계.
    pub fn align_up(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let rem = ts.timestamp_millis().rem_euclid(self.as_millis());
        if rem == 0 {
            ts
        } else {
            ts + chrono::Duration::milliseconds(self.as_millis() - rem)
        }
    }

    /// 기간 종료 시각으로부터 기간 시작 시각 (배타적 하한).
    pub fn period_start(&self, period_end: DateTime<Utc>) -> DateTime<Utc> {
        period_end - self.chrono_duration()
    }

    /// `[start, end]` 구간에 속한 모든 기간 종료 경계를 오래된 순으로 열거합니다.
    pub fn period_ends(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let step = self.chrono_duration();
        let mut current = self.align_up(start);
        let mut ends = Vec::new();

        while current <= end {
            ends.push(current);
            current += step;
        }

        ends
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            _ => Err(format!("Invalid timeframe: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 21, h, m, s).unwrap()
    }

    #[test]
    fn test_timeframe_duration() {
        assert_eq!(Timeframe::M1.as_millis(), 60_000);
        assert_eq!(Timeframe::H4.as_minutes(), 240);
        assert_eq!(Timeframe::D1.duration().as_secs(), 86_400);
    }

    #[test]
    fn test_timeframe_parse_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_period_boundary_rules() {
        assert!(Timeframe::M1.is_period_boundary(at(13, 7, 0)));
        assert!(!Timeframe::M5.is_period_boundary(at(13, 7, 0)));
        assert!(Timeframe::M15.is_period_boundary(at(13, 45, 0)));
        assert!(Timeframe::H1.is_period_boundary(at(13, 0, 0)));
        assert!(!Timeframe::H4.is_period_boundary(at(13, 0, 0)));
        assert!(Timeframe::H4.is_period_boundary(at(12, 0, 0)));
        assert!(Timeframe::D1.is_period_boundary(at(0, 0, 0)));
        assert!(!Timeframe::D1.is_period_boundary(at(4, 0, 0)));
        // 초 단위가 남아 있으면 경계가 아님
        assert!(!Timeframe::M1.is_period_boundary(at(13, 7, 30)));
    }

    #[test]
    fn test_align() {
        assert_eq!(Timeframe::M15.align_down(at(13, 44, 59)), at(13, 30, 0));
        assert_eq!(Timeframe::M15.align_up(at(13, 44, 59)), at(13, 45, 0));
        assert_eq!(Timeframe::H4.align_down(at(15, 10, 0)), at(12, 0, 0));
        assert_eq!(Timeframe::H1.align_up(at(13, 0, 0)), at(13, 0, 0));
    }

    #[test]
    fn test_period_ends() {
        let ends = Timeframe::M5.period_ends(at(10, 2, 0), at(10, 20, 0));
        assert_eq!(ends, vec![at(10, 5, 0), at(10, 10, 0), at(10, 15, 0), at(10, 20, 0)]);

        // 구간 안에 경계가 없으면 비어 있음
        assert!(Timeframe::D1.period_ends(at(10, 0, 0), at(12, 0, 0)).is_empty());
    }

    proptest! {
        #[test]
        fn prop_period_ends_are_grid_aligned(
            start_secs in 1_700_000_000i64..1_760_000_000i64,
            span_secs in 0i64..(3 * 86_400),
            idx in 0usize..6,
        ) {
            let tf = Timeframe::ALL[idx];
            let start = Utc.timestamp_opt(start_secs, 0).unwrap();
            let end = start + chrono::Duration::seconds(span_secs);

            for pe in tf.period_ends(start, end) {
                prop_assert!(tf.is_period_boundary(pe));
                prop_assert!(pe >= start && pe <= end);
                prop_assert_eq!(pe.second(), 0);
                match tf {
                    Timeframe::H1 => prop_assert_eq!(pe.minute(), 0),
                    Timeframe::H4 => {
                        prop_assert_eq!(pe.minute(), 0);
                        prop_assert_eq!(pe.hour() % 4, 0);
                    }
                    Timeframe::D1 => {
                        prop_assert_eq!(pe.minute(), 0);
                        prop_assert_eq!(pe.hour(), 0);
                    }
                    _ => {}
                }
            }
        }
    }
}
