//! TRON chain access: a circuit-breaker-guarded REST client plus the price
//! feed. Energy rental lives in `crate::payout::resource` since it is only
//! ever consumed by the payout pipeline.

pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod price_feed;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use client::{AccountBalance, AccountResources, BroadcastResult, ChainClient, TransactionInfo, Trc20Transfer};
pub use error::ChainError;
pub use price_feed::{PriceFeed, PriceQuote};
