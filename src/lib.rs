//! Spot Exchange Engine
//!
//! Price-time priority limit order matching with immediate settlement
//! against a balance ledger, trade recording and per-order rewards.

pub mod api;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod order;
pub mod orderbook;
pub mod rewards;
pub mod settlement;
pub mod trades;
pub mod types;

pub use config::ServerConfig;
pub use engine::{EngineError, MatchingEngine, PlaceOrderOutcome, ValidationError};
pub use ledger::{InMemoryLedger, Ledger, LedgerError};
pub use order::{Order, OrderStatus, PlaceOrderRequest, Side};
pub use orderbook::{OrderBook, OrderBookSnapshot};
pub use rewards::{InMemoryRewards, RewardAccount, RewardsStore};
pub use trades::{InMemoryTradeRecorder, StoreError, TradeLeg, TradeRecorder, TradeSummary};
pub use types::*;
