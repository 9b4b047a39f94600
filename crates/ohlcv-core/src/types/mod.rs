//! 공통 타입 정의.

pub mod timeframe;

pub use timeframe::*;

use rust_decimal::Decimal;

/// 가격 타입.
pub type Price = Decimal;

/// 자산 식별자 (토큰 컨트랙트 주소).
pub type AssetId = String;
