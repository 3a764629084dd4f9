//! Matching Engine - order intake, matching and settlement across assets

use crate::ledger::{InMemoryLedger, Ledger, LedgerError};
use crate::order::{Order, PlaceOrderRequest, Side};
use crate::orderbook::{OrderBook, OrderBookSnapshot};
use crate::rewards::{self, InMemoryRewards, RewardAccount, RewardsStore};
use crate::settlement::Settlement;
use crate::trades::{InMemoryTradeRecorder, TradeLeg, TradeRecorder, TradeSummary};
use crate::types::{AccountId, Asset, OrderId, Price, Quantity, TradeId};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Reasons an order or wallet request is turned away before anything changes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("asset is required")]
    EmptyAsset,
    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset: Asset,
        required: Decimal,
        available: Decimal,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid order: {0}")]
    Validation(#[from] ValidationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn internal(err: impl Display) -> EngineError {
    EngineError::Internal(err.to_string())
}

/// Maps wallet-side ledger failures onto the engine taxonomy.
fn wallet_error(err: LedgerError) -> EngineError {
    match err {
        LedgerError::InvalidAmount(amount) => ValidationError::NonPositiveAmount(amount).into(),
        LedgerError::InsufficientBalance {
            asset,
            required,
            available,
            ..
        } => ValidationError::InsufficientBalance {
            asset,
            required,
            available,
        }
        .into(),
        LedgerError::Storage(reason) => EngineError::Internal(reason),
    }
}

/// Result of a completed intake
#[derive(Debug, Clone)]
pub struct PlaceOrderOutcome {
    /// The submitted order with its final remaining quantity and status
    pub order: Order,
    /// Trade legs produced, two per fill
    pub fills: Vec<TradeLeg>,
    /// Resting orders passed over because their seller could not cover the fill
    pub skipped: Vec<OrderId>,
}

/// Work produced by one matching pass, not yet committed
#[derive(Default)]
struct MatchResult {
    legs: Vec<TradeLeg>,
    skipped: Vec<OrderId>,
}

/// The main matching engine
pub struct MatchingEngine {
    /// Order books by asset, each behind its own lock
    books: RwLock<HashMap<Asset, Arc<Mutex<OrderBook>>>>,
    /// Which book holds an order
    order_assets: RwLock<HashMap<OrderId, Asset>>,
    ledger: Arc<dyn Ledger>,
    trades: Arc<dyn TradeRecorder>,
    rewards: Arc<dyn RewardsStore>,
    order_counter: AtomicU64,
    trade_counter: AtomicU64,
    /// Window for "recent" trade counts in summaries
    history_window: Duration,
}

impl MatchingEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        trades: Arc<dyn TradeRecorder>,
        rewards: Arc<dyn RewardsStore>,
    ) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            order_assets: RwLock::new(HashMap::new()),
            ledger,
            trades,
            rewards,
            order_counter: AtomicU64::new(1),
            trade_counter: AtomicU64::new(1),
            history_window: Duration::days(7),
        }
    }

    /// Engine backed by the in-memory stores
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryTradeRecorder::new()),
            Arc::new(InMemoryRewards::new()),
        )
    }

    pub fn with_history_window(mut self, window: Duration) -> Self {
        self.history_window = window;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    fn next_order_id(&self) -> OrderId {
        OrderId(self.order_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn next_trade_id(&self) -> TradeId {
        TradeId(self.trade_counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Get or lazily create the book for `asset`
    fn book(&self, asset: &Asset) -> Result<Arc<Mutex<OrderBook>>, EngineError> {
        {
            let books = self
                .books
                .read()
                .map_err(|_| internal("order book registry lock poisoned"))?;
            if let Some(book) = books.get(asset) {
                return Ok(Arc::clone(book));
            }
        }

        let mut books = self
            .books
            .write()
            .map_err(|_| internal("order book registry lock poisoned"))?;
        let book = books
            .entry(asset.clone())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(asset.clone()))));
        Ok(Arc::clone(book))
    }

    fn existing_book(
        &self,
        asset: &Asset,
    ) -> Result<Option<Arc<Mutex<OrderBook>>>, EngineError> {
        let books = self
            .books
            .read()
            .map_err(|_| internal("order book registry lock poisoned"))?;
        Ok(books.get(asset).cloned())
    }

    fn lock_book(book: &Mutex<OrderBook>) -> Result<MutexGuard<'_, OrderBook>, EngineError> {
        book.lock().map_err(|_| internal("order book lock poisoned"))
    }

    /// Submit a limit order for `owner`.
    ///
    /// The order is matched against the opposite side of its asset's book
    /// under that book's lock; any unfilled remainder rests. Either the whole
    /// intake commits, or on an internal failure nothing of it stays visible.
    pub fn place_order(
        &self,
        owner: &AccountId,
        request: PlaceOrderRequest,
    ) -> Result<PlaceOrderOutcome, EngineError> {
        let asset = Asset::new(&request.asset);
        let price = Price::new(request.price);
        let quantity = Quantity::new(request.quantity);

        if asset.is_empty() {
            return Err(ValidationError::EmptyAsset.into());
        }
        if !price.is_positive() {
            return Err(ValidationError::NonPositivePrice(request.price).into());
        }
        if !quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity(request.quantity).into());
        }

        let book = self.book(&asset)?;
        let mut book = Self::lock_book(&book)?;

        if request.side == Side::Sell {
            let available = self.ledger.balance(owner, &asset).map_err(internal)?;
            if available < quantity.as_decimal() {
                warn!(
                    "Rejected sell from {}: {} {} requested, {} available",
                    owner, quantity, asset, available
                );
                return Err(ValidationError::InsufficientBalance {
                    asset,
                    required: quantity.as_decimal(),
                    available,
                }
                .into());
            }
        }

        let order = Order::new_limit(
            self.next_order_id(),
            owner.clone(),
            asset,
            request.side,
            price,
            quantity,
        );
        info!(
            order_id = %order.id,
            owner = %order.owner,
            asset = %order.asset,
            side = ?order.side,
            price = %order.price,
            quantity = %order.quantity,
            "Order accepted"
        );

        book.begin_batch();
        match self.execute(&mut book, order) {
            Ok(outcome) => {
                book.commit_batch();
                match self.order_assets.write() {
                    Ok(mut index) => {
                        index.insert(outcome.order.id, outcome.order.asset.clone());
                    }
                    Err(_) => {
                        error!("Order index lock poisoned, {} not indexed", outcome.order.id)
                    }
                }
                info!(
                    order_id = %outcome.order.id,
                    status = ?outcome.order.status,
                    remaining = %outcome.order.remaining_quantity,
                    fills = outcome.fills.len() / 2,
                    "Order committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                book.rollback_batch();
                error!("Order intake rolled back: {}", err);
                Err(err)
            }
        }
    }

    /// Match, rest and commit one order. On error the caller rolls back the book.
    fn execute(
        &self,
        book: &mut OrderBook,
        mut order: Order,
    ) -> Result<PlaceOrderOutcome, EngineError> {
        let mut settlement = Settlement::new(self.ledger.as_ref(), order.asset.clone());
        let matched = self.match_order(book, &mut settlement, &mut order)?;

        if order.remaining_quantity.is_positive() {
            book.insert(order.clone()).map_err(internal)?;
        } else {
            book.archive(order.clone()).map_err(internal)?;
        }

        self.commit(&order, &matched.legs, settlement)?;

        Ok(PlaceOrderOutcome {
            order,
            fills: matched.legs,
            skipped: matched.skipped,
        })
    }

    /// Walk eligible resting orders best first, filling `incoming` until it
    /// is exhausted or nothing eligible is left.
    fn match_order(
        &self,
        book: &mut OrderBook,
        settlement: &mut Settlement<'_>,
        incoming: &mut Order,
    ) -> Result<MatchResult, EngineError> {
        let mut result = MatchResult::default();
        let mut cursor = book.candidates(incoming.side, incoming.price);

        while incoming.remaining_quantity.is_positive() {
            let Some(candidate) = book.next_candidate(&mut cursor) else {
                break;
            };

            let fill_qty =
                std::cmp::min(incoming.remaining_quantity, candidate.remaining_quantity);
            // Maker price is authoritative.
            let price = candidate.price;
            let (buyer, seller) = match incoming.side {
                Side::Buy => (incoming.owner.clone(), candidate.owner.clone()),
                Side::Sell => (candidate.owner.clone(), incoming.owner.clone()),
            };

            // A resting ask must still be fully backed by its owner; otherwise
            // the seller only has to cover this fill.
            let required = match candidate.side {
                Side::Sell => candidate.remaining_quantity,
                Side::Buy => fill_qty,
            };
            let available = settlement.available(&seller).map_err(internal)?;
            if available < required.as_decimal() {
                warn!(
                    "Skipping {} on {}: seller {} holds {} of {} required",
                    candidate.id, candidate.asset, seller, available, required
                );
                result.skipped.push(candidate.id);
                continue;
            }

            match settlement.transfer(&seller, &buyer, fill_qty.as_decimal()) {
                Ok(()) => {}
                Err(LedgerError::InsufficientBalance { available, .. }) => {
                    warn!(
                        "Skipping {} on {}: transfer of {} refused, {} available",
                        candidate.id, candidate.asset, fill_qty, available
                    );
                    result.skipped.push(candidate.id);
                    continue;
                }
                Err(err) => return Err(internal(err)),
            }

            let trade_id = self.next_trade_id();
            let executed_at = Utc::now();
            result.legs.push(TradeLeg {
                trade_id,
                order_id: incoming.id,
                owner: incoming.owner.clone(),
                asset: incoming.asset.clone(),
                side: incoming.side,
                quantity: fill_qty,
                price,
                executed_at,
            });
            result.legs.push(TradeLeg {
                trade_id,
                order_id: candidate.id,
                owner: candidate.owner.clone(),
                asset: candidate.asset.clone(),
                side: candidate.side,
                quantity: fill_qty,
                price,
                executed_at,
            });

            incoming.fill(fill_qty).map_err(internal)?;
            book.fill(&candidate.id, fill_qty).map_err(internal)?;
            debug!(
                "{} filled {} {} @ {} against {} ({})",
                incoming.id, fill_qty, incoming.asset, price, candidate.id, trade_id
            );
        }

        Ok(result)
    }

    /// Persist rewards, trade legs and balances, in that order. The ledger
    /// goes last because it is the only step that can legitimately refuse;
    /// earlier steps are compensated if a later one fails.
    fn commit(
        &self,
        order: &Order,
        legs: &[TradeLeg],
        settlement: Settlement<'_>,
    ) -> Result<(), EngineError> {
        let points = rewards::points_for(order.quantity);
        self.rewards.award(&order.owner, points).map_err(internal)?;

        if let Err(err) = self.trades.record(legs) {
            self.revoke_rewards(&order.owner, points);
            return Err(internal(err));
        }

        if let Err(err) = settlement.commit() {
            let trade_ids: Vec<TradeId> = legs.iter().map(|leg| leg.trade_id).collect();
            if let Err(retract_err) = self.trades.retract(&trade_ids) {
                error!("Failed to retract trades of {}: {}", order.id, retract_err);
            }
            self.revoke_rewards(&order.owner, points);
            return Err(internal(err));
        }

        Ok(())
    }

    fn revoke_rewards(&self, owner: &AccountId, points: u64) {
        if let Err(err) = self.rewards.revoke(owner, points) {
            error!("Failed to revoke {} points from {}: {}", points, owner, err);
        }
    }

    /// Get order book snapshot; an asset never traded has empty sides.
    pub fn order_book(&self, asset: &str) -> Result<OrderBookSnapshot, EngineError> {
        let asset = Asset::new(asset);
        let Some(book) = self.existing_book(&asset)? else {
            return Ok(OrderBookSnapshot::empty(asset));
        };
        let snapshot = Self::lock_book(&book)?.snapshot();
        Ok(snapshot)
    }

    /// Look up an order, resting or filled
    pub fn order(&self, order_id: OrderId) -> Result<Option<Order>, EngineError> {
        let asset = {
            let index = self
                .order_assets
                .read()
                .map_err(|_| internal("order index lock poisoned"))?;
            match index.get(&order_id) {
                Some(asset) => asset.clone(),
                None => return Ok(None),
            }
        };
        let Some(book) = self.existing_book(&asset)? else {
            return Ok(None);
        };
        let order = Self::lock_book(&book)?.get(&order_id).cloned();
        Ok(order)
    }

    /// Resting orders of `owner` across all assets, oldest first
    pub fn open_orders(&self, owner: &AccountId) -> Result<Vec<Order>, EngineError> {
        let books: Vec<Arc<Mutex<OrderBook>>> = self
            .books
            .read()
            .map_err(|_| internal("order book registry lock poisoned"))?
            .values()
            .cloned()
            .collect();

        let mut orders = Vec::new();
        for book in books {
            orders.extend(Self::lock_book(&book)?.orders_for(owner));
        }
        orders.sort_by_key(|order| order.id);
        Ok(orders)
    }

    pub fn trade_history(&self, owner: &AccountId) -> Result<Vec<TradeLeg>, EngineError> {
        self.trades.history(owner).map_err(internal)
    }

    pub fn trade_summary(&self, owner: &AccountId) -> Result<TradeSummary, EngineError> {
        self.trades
            .summary(owner, Utc::now() - self.history_window)
            .map_err(internal)
    }

    pub fn rewards(&self, owner: &AccountId) -> Result<RewardAccount, EngineError> {
        self.rewards.get(owner).map_err(internal)
    }

    pub fn balances(&self, owner: &AccountId) -> Result<Vec<(Asset, Decimal)>, EngineError> {
        self.ledger.balances(owner).map_err(internal)
    }

    /// Credit funds on behalf of the wallet collaborator.
    ///
    /// Wallet changes take the asset's book lock, so they never land between
    /// the matching and the commit of an intake on that asset.
    pub fn deposit(
        &self,
        owner: &AccountId,
        asset: &str,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        let asset = Asset::new(asset);
        if asset.is_empty() {
            return Err(ValidationError::EmptyAsset.into());
        }
        let book = self.book(&asset)?;
        let _book = Self::lock_book(&book)?;
        let balance = self
            .ledger
            .credit(owner, &asset, amount)
            .map_err(wallet_error)?;
        info!("{} deposited {} {}", owner, amount, asset);
        Ok(balance)
    }

    /// Debit funds on behalf of the wallet collaborator
    pub fn withdraw(
        &self,
        owner: &AccountId,
        asset: &str,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        let asset = Asset::new(asset);
        if asset.is_empty() {
            return Err(ValidationError::EmptyAsset.into());
        }
        let book = self.book(&asset)?;
        let _book = Self::lock_book(&book)?;
        let balance = self
            .ledger
            .debit(owner, &asset, amount)
            .map_err(wallet_error)?;
        info!("{} withdrew {} {}", owner, amount, asset);
        Ok(balance)
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}
