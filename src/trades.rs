//! Trade recording
//!
//! Each fill produces two legs, one per counterparty, sharing a `TradeId`,
//! quantity and price. Legs are immutable once recorded.

use crate::order::Side;
use crate::types::{AccountId, Asset, OrderId, Price, Quantity, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One side of an executed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub trade_id: TradeId,
    pub order_id: OrderId,
    pub owner: AccountId,
    pub asset: Asset,
    pub side: Side,
    pub quantity: Quantity,
    /// Execution price, always the resting order's limit
    pub price: Price,
    pub executed_at: DateTime<Utc>,
}

impl TradeLeg {
    pub fn notional(&self) -> Decimal {
        self.quantity.notional(self.price)
    }
}

/// Per-account trading statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub total_buy_volume: Decimal,
    pub total_sell_volume: Decimal,
    /// Legs executed inside the recent window
    pub recent_trades: usize,
}

/// Append-only store of trade legs
pub trait TradeRecorder: Send + Sync {
    fn record(&self, legs: &[TradeLeg]) -> Result<(), StoreError>;

    /// Drop legs recorded by an intake that is being rolled back.
    fn retract(&self, trade_ids: &[TradeId]) -> Result<(), StoreError>;

    /// An account's legs, oldest first
    fn history(&self, account: &AccountId) -> Result<Vec<TradeLeg>, StoreError>;

    fn legs_for_order(&self, order_id: OrderId) -> Result<Vec<TradeLeg>, StoreError>;

    fn summary(
        &self,
        account: &AccountId,
        since: DateTime<Utc>,
    ) -> Result<TradeSummary, StoreError> {
        let mut summary = TradeSummary::default();
        for leg in self.history(account)? {
            match leg.side {
                Side::Buy => summary.total_buy_volume += leg.notional(),
                Side::Sell => summary.total_sell_volume += leg.notional(),
            }
            if leg.executed_at >= since {
                summary.recent_trades += 1;
            }
        }
        Ok(summary)
    }
}

/// In-memory trade log
#[derive(Debug, Default)]
pub struct InMemoryTradeRecorder {
    legs: RwLock<Vec<TradeLeg>>,
}

impl InMemoryTradeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<TradeLeg>>, StoreError> {
        self.legs
            .read()
            .map_err(|_| StoreError::Unavailable("trade log lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<TradeLeg>>, StoreError> {
        self.legs
            .write()
            .map_err(|_| StoreError::Unavailable("trade log lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.read().map(|legs| legs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TradeRecorder for InMemoryTradeRecorder {
    fn record(&self, legs: &[TradeLeg]) -> Result<(), StoreError> {
        self.write()?.extend_from_slice(legs);
        Ok(())
    }

    fn retract(&self, trade_ids: &[TradeId]) -> Result<(), StoreError> {
        let doomed: HashSet<TradeId> = trade_ids.iter().copied().collect();
        self.write()?.retain(|leg| !doomed.contains(&leg.trade_id));
        Ok(())
    }

    fn history(&self, account: &AccountId) -> Result<Vec<TradeLeg>, StoreError> {
        let mut legs: Vec<TradeLeg> = self
            .read()?
            .iter()
            .filter(|leg| &leg.owner == account)
            .cloned()
            .collect();
        legs.sort_by_key(|leg| (leg.executed_at, leg.trade_id));
        Ok(legs)
    }

    fn legs_for_order(&self, order_id: OrderId) -> Result<Vec<TradeLeg>, StoreError> {
        Ok(self
            .read()?
            .iter()
            .filter(|leg| leg.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn leg(
        trade: u64,
        order: u64,
        owner: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> TradeLeg {
        TradeLeg {
            trade_id: TradeId(trade),
            order_id: OrderId(order),
            owner: AccountId::new(owner),
            asset: Asset::btc(),
            side,
            quantity: Quantity::new(qty),
            price: Price::new(price),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_per_account() {
        let recorder = InMemoryTradeRecorder::new();
        recorder
            .record(&[
                leg(1, 2, "bob", Side::Buy, dec!(6), dec!(100)),
                leg(1, 1, "alice", Side::Sell, dec!(6), dec!(100)),
            ])
            .unwrap();

        let alice = recorder.history(&AccountId::new("alice")).unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].side, Side::Sell);
        assert_eq!(recorder.legs_for_order(OrderId(2)).unwrap().len(), 1);
        assert!(recorder.history(&AccountId::new("carol")).unwrap().is_empty());
    }

    #[test]
    fn test_retract_removes_both_legs() {
        let recorder = InMemoryTradeRecorder::new();
        recorder
            .record(&[
                leg(1, 2, "bob", Side::Buy, dec!(1), dec!(100)),
                leg(1, 1, "alice", Side::Sell, dec!(1), dec!(100)),
                leg(2, 2, "bob", Side::Buy, dec!(1), dec!(101)),
                leg(2, 3, "carol", Side::Sell, dec!(1), dec!(101)),
            ])
            .unwrap();

        recorder.retract(&[TradeId(2)]).unwrap();
        assert_eq!(recorder.len(), 2);
        assert!(recorder.history(&AccountId::new("carol")).unwrap().is_empty());
    }

    #[test]
    fn test_summary_volumes_and_window() {
        let recorder = InMemoryTradeRecorder::new();
        let mut old = leg(1, 1, "bob", Side::Buy, dec!(2), dec!(100));
        old.executed_at = Utc::now() - Duration::days(30);
        recorder
            .record(&[
                old,
                leg(2, 2, "bob", Side::Sell, dec!(1), dec!(50)),
                leg(3, 3, "bob", Side::Buy, dec!(0.5), dec!(10)),
            ])
            .unwrap();

        let summary = recorder
            .summary(&AccountId::new("bob"), Utc::now() - Duration::days(7))
            .unwrap();
        assert_eq!(summary.total_buy_volume, dec!(205));
        assert_eq!(summary.total_sell_volume, dec!(50));
        assert_eq!(summary.recent_trades, 2);
    }
}
