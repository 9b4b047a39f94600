//! 도메인 모델.

pub mod asset;
pub mod backfill;
pub mod market_data;

pub use asset::*;
pub use backfill::*;
pub use market_data::*;
