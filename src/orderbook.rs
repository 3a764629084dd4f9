//! Per-asset order book with price-time priority

use crate::order::{Order, OrderError, Side};
use crate::types::{AccountId, Asset, OrderId, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("order {0} does not belong to this book")]
    WrongAsset(OrderId),
    #[error("order {0} is already in the book")]
    Duplicate(OrderId),
    #[error("order {0} has nothing left to rest")]
    NotRestable(OrderId),
    #[error("order {0} is not resting")]
    NotResting(OrderId),
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// A single price level, orders kept in arrival order
#[derive(Debug, Default)]
struct Level {
    orders: BTreeMap<OrderId, Order>,
}

impl Level {
    fn add_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }

    fn remove_order(&mut self, order_id: &OrderId) -> Option<Order> {
        self.orders.remove(order_id)
    }

    fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Book mutations made since the last `begin_batch`, newest last
#[derive(Debug)]
enum BookChange {
    Rested(OrderId),
    Filled { before: Order },
    Archived(OrderId),
}

/// Lazy walk over the eligible side of the book in priority order.
///
/// The cursor only remembers the last position it handed out, so every step
/// reads the live book: orders removed behind it are not revisited and orders
/// shrunk in place are seen with their current remaining quantity.
#[derive(Debug, Clone)]
pub struct CandidateCursor {
    incoming: Side,
    limit: Price,
    last: Option<(Price, OrderId)>,
}

impl CandidateCursor {
    /// Side of the resting orders being walked
    pub fn resting_side(&self) -> Side {
        self.incoming.opposite()
    }
}

/// One resting order as shown to market data consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
    /// price × remaining quantity
    pub total: Decimal,
}

/// Full order book snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub asset: Asset,
    /// Highest price first
    pub bids: Vec<BookEntry>,
    /// Lowest price first
    pub asks: Vec<BookEntry>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn empty(asset: Asset) -> Self {
        Self {
            asset,
            bids: Vec::new(),
            asks: Vec::new(),
            best_bid: None,
            best_ask: None,
            sequence: 0,
            timestamp: Utc::now(),
        }
    }
}

/// The order book for a single asset
#[derive(Debug)]
pub struct OrderBook {
    asset: Asset,
    /// Bid levels (iterated in reverse for highest first)
    bids: BTreeMap<Price, Level>,
    /// Ask levels (lowest first)
    asks: BTreeMap<Price, Level>,
    /// Resting order lookup by ID
    index: HashMap<OrderId, (Price, Side)>,
    /// Orders that reached `Filled`, kept for lookups
    filled: HashMap<OrderId, Order>,
    journal: Vec<BookChange>,
    /// Bumped once per committed batch
    sequence: u64,
}

impl OrderBook {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            filled: HashMap::new(),
            journal: Vec::new(),
            sequence: 0,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// Number of resting orders on both sides
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn levels(&self, side: Side) -> &BTreeMap<Price, Level> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Level> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Add an active order to the side named by its `side` field.
    pub fn insert(&mut self, order: Order) -> Result<(), BookError> {
        if order.asset != self.asset {
            return Err(BookError::WrongAsset(order.id));
        }
        if !order.is_active() || !order.remaining_quantity.is_positive() {
            return Err(BookError::NotRestable(order.id));
        }
        if self.index.contains_key(&order.id) || self.filled.contains_key(&order.id) {
            return Err(BookError::Duplicate(order.id));
        }

        let order_id = order.id;
        self.rest(order);
        self.journal.push(BookChange::Rested(order_id));
        Ok(())
    }

    fn rest(&mut self, order: Order) {
        let (id, price, side) = (order.id, order.price, order.side);
        self.levels_mut(side).entry(price).or_default().add_order(order);
        self.index.insert(id, (price, side));
    }

    fn unrest(&mut self, order_id: &OrderId) -> Option<Order> {
        let (price, side) = self.index.remove(order_id)?;
        let levels = self.levels_mut(side);
        let level = levels.get_mut(&price)?;
        let order = level.remove_order(order_id);
        if level.is_empty() {
            levels.remove(&price);
        }
        order
    }

    /// Keep a terminal order that never rested (a taker filled on arrival).
    pub fn archive(&mut self, order: Order) -> Result<(), BookError> {
        if order.asset != self.asset {
            return Err(BookError::WrongAsset(order.id));
        }
        if !order.is_filled() {
            return Err(BookError::NotResting(order.id));
        }
        if self.index.contains_key(&order.id) || self.filled.contains_key(&order.id) {
            return Err(BookError::Duplicate(order.id));
        }
        let order_id = order.id;
        self.filled.insert(order_id, order);
        self.journal.push(BookChange::Archived(order_id));
        Ok(())
    }

    /// Start walking the opposite side for an incoming order on `incoming`
    /// limited at `limit`.
    pub fn candidates(&self, incoming: Side, limit: Price) -> CandidateCursor {
        CandidateCursor {
            incoming,
            limit,
            last: None,
        }
    }

    /// Next eligible resting order after the cursor position, if any.
    pub fn next_candidate(&self, cursor: &mut CandidateCursor) -> Option<Order> {
        let resting = cursor.resting_side();
        let book = self.levels(resting);
        let levels: Box<dyn Iterator<Item = (&Price, &Level)> + '_> = match (resting, cursor.last) {
            (Side::Sell, None) => Box::new(book.iter()),
            (Side::Sell, Some((price, _))) => Box::new(book.range(price..)),
            (Side::Buy, None) => Box::new(book.iter().rev()),
            (Side::Buy, Some((price, _))) => Box::new(book.range(..=price).rev()),
        };

        for (price, level) in levels {
            if !cursor.incoming.crosses(cursor.limit, *price) {
                return None;
            }
            let after = match cursor.last {
                Some((last_price, last_id)) if last_price == *price => Bound::Excluded(last_id),
                _ => Bound::Unbounded,
            };
            if let Some((_, order)) = level.orders.range((after, Bound::Unbounded)).next() {
                cursor.last = Some((*price, order.id));
                return Some(order.clone());
            }
        }
        None
    }

    /// Shrink a resting order by `qty`. A fully filled order leaves the live
    /// side and is archived. Returns the order as it is after the fill.
    pub fn fill(&mut self, order_id: &OrderId, qty: Quantity) -> Result<Order, BookError> {
        let (price, side) = *self
            .index
            .get(order_id)
            .ok_or(BookError::NotResting(*order_id))?;
        let level = self
            .levels_mut(side)
            .get_mut(&price)
            .ok_or(BookError::NotResting(*order_id))?;
        let order = level
            .orders
            .get_mut(order_id)
            .ok_or(BookError::NotResting(*order_id))?;

        let before = order.clone();
        order.fill(qty)?;
        let after = order.clone();
        self.journal.push(BookChange::Filled { before });

        if after.is_filled() {
            self.unrest(order_id);
            self.filled.insert(after.id, after.clone());
        }
        Ok(after)
    }

    /// Look up a resting or filled order
    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        if let Some((price, side)) = self.index.get(order_id) {
            return self.levels(*side).get(price)?.orders.get(order_id);
        }
        self.filled.get(order_id)
    }

    /// Resting orders owned by `owner`
    pub fn orders_for(&self, owner: &AccountId) -> Vec<Order> {
        self.bids
            .values()
            .rev()
            .chain(self.asks.values())
            .flat_map(|level| level.orders.values())
            .filter(|order| &order.owner == owner)
            .cloned()
            .collect()
    }

    /// Forget any journalled changes; the next rollback undoes only what follows.
    pub fn begin_batch(&mut self) {
        self.journal.clear();
    }

    /// Make the changes since `begin_batch` permanent.
    pub fn commit_batch(&mut self) {
        if !self.journal.is_empty() {
            self.sequence += 1;
        }
        self.journal.clear();
    }

    /// Undo every change since `begin_batch`, newest first.
    pub fn rollback_batch(&mut self) {
        while let Some(change) = self.journal.pop() {
            match change {
                BookChange::Rested(order_id) => {
                    self.unrest(&order_id);
                }
                BookChange::Archived(order_id) => {
                    self.filled.remove(&order_id);
                }
                BookChange::Filled { before } => {
                    self.filled.remove(&before.id);
                    self.unrest(&before.id);
                    self.rest(before);
                }
            }
        }
    }

    fn entries<'a>(levels: impl Iterator<Item = &'a Level>) -> Vec<BookEntry> {
        levels
            .flat_map(|level| level.orders.values())
            .map(|order| BookEntry {
                order_id: order.id,
                price: order.price,
                quantity: order.remaining_quantity,
                total: order.remaining_quantity.notional(order.price),
            })
            .collect()
    }

    /// Get order book snapshot, one entry per resting order
    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            asset: self.asset.clone(),
            bids: Self::entries(self.bids.values().rev()),
            asks: Self::entries(self.asks.values()),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            sequence: self.sequence,
            timestamp: Utc::now(),
        }
    }
}
