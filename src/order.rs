//! Order types and structures

use crate::types::{AccountId, Asset, OrderId, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Whether a resting order at `resting` may trade with an incoming
    /// order of this side limited at `limit`.
    pub fn crosses(&self, limit: Price, resting: Price) -> bool {
        match self {
            Side::Buy => resting <= limit,
            Side::Sell => resting >= limit,
        }
    }
}

/// Order status
///
/// There is no cancellation path, so an order is either still resting or done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order has unfilled quantity
    Active,
    /// Order is completely filled
    Filled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order {order_id} is already filled")]
    AlreadyFilled { order_id: OrderId },
    #[error("fill of {requested} exceeds remaining {remaining} on order {order_id}")]
    Overfill {
        order_id: OrderId,
        remaining: Quantity,
        requested: Quantity,
    },
    #[error("fill quantity must be positive, got {0}")]
    NonPositiveFill(Quantity),
}

/// A limit order in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Account that submitted the order
    pub owner: AccountId,
    pub asset: Asset,
    pub side: Side,
    /// Limit price
    pub price: Price,
    /// Quantity at submission
    pub quantity: Quantity,
    /// Remaining unfilled quantity, never increases
    pub remaining_quantity: Quantity,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new active limit order
    pub fn new_limit(
        id: OrderId,
        owner: AccountId,
        asset: Asset,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            asset,
            side,
            price,
            quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    /// Quantity executed so far
    pub fn filled_quantity(&self) -> Quantity {
        self.quantity - self.remaining_quantity
    }

    /// Fill some quantity. Status flips to `Filled` exactly when nothing remains.
    pub fn fill(&mut self, qty: Quantity) -> Result<(), OrderError> {
        if self.is_filled() {
            return Err(OrderError::AlreadyFilled { order_id: self.id });
        }
        if !qty.is_positive() {
            return Err(OrderError::NonPositiveFill(qty));
        }
        if qty > self.remaining_quantity {
            return Err(OrderError::Overfill {
                order_id: self.id,
                remaining: self.remaining_quantity,
                requested: qty,
            });
        }

        self.remaining_quantity -= qty;
        self.updated_at = Utc::now();
        if self.remaining_quantity.is_zero() {
            self.status = OrderStatus::Filled;
        }
        Ok(())
    }
}

/// Request to place a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub asset: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PlaceOrderRequest {
    pub fn new(asset: &str, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            asset: asset.to_string(),
            side,
            price,
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(qty: Decimal) -> Order {
        Order::new_limit(
            OrderId(1),
            AccountId::new("alice"),
            Asset::btc(),
            Side::Sell,
            Price::new(dec!(100)),
            Quantity::new(qty),
        )
    }

    #[test]
    fn test_limit_order_creation() {
        let order = order(dec!(1.5));
        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.remaining_quantity, order.quantity);
        assert!(order.is_active());
    }

    #[test]
    fn test_order_fill() {
        let mut order = order(dec!(1.0));

        order.fill(Quantity::new(dec!(0.4))).unwrap();
        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.remaining_quantity.as_decimal(), dec!(0.6));
        assert_eq!(order.filled_quantity().as_decimal(), dec!(0.4));

        order.fill(Quantity::new(dec!(0.6))).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.remaining_quantity.is_zero());
    }

    #[test]
    fn test_fill_rejects_overfill_and_refill() {
        let mut order = order(dec!(1.0));
        let err = order.fill(Quantity::new(dec!(2))).unwrap_err();
        assert!(matches!(err, OrderError::Overfill { .. }));
        assert_eq!(order.remaining_quantity.as_decimal(), dec!(1.0));

        assert!(order.fill(Quantity::ZERO).is_err());

        order.fill(Quantity::new(dec!(1.0))).unwrap();
        assert_eq!(
            order.fill(Quantity::new(dec!(0.1))),
            Err(OrderError::AlreadyFilled { order_id: OrderId(1) })
        );
    }

    #[test]
    fn test_side_crossing() {
        let limit = Price::new(dec!(100));
        assert!(Side::Buy.crosses(limit, Price::new(dec!(99))));
        assert!(Side::Buy.crosses(limit, Price::new(dec!(100))));
        assert!(!Side::Buy.crosses(limit, Price::new(dec!(101))));
        assert!(Side::Sell.crosses(limit, Price::new(dec!(101))));
        assert!(!Side::Sell.crosses(limit, Price::new(dec!(99))));
    }
}
