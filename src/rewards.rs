//! Rewards accounting
//!
//! Every accepted order earns its owner `floor(10 × quantity)` points and
//! bumps the owner's trade counter, whether or not it matches.

use crate::trades::StoreError;
use crate::types::{AccountId, Quantity};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Points earned per unit of order quantity
pub const POINTS_PER_UNIT: u64 = 10;

/// Points for an order of `quantity`, saturating at `u64::MAX`
pub fn points_for(quantity: Quantity) -> u64 {
    quantity
        .as_decimal()
        .checked_mul(Decimal::from(POINTS_PER_UNIT))
        .and_then(|points| points.floor().to_u64())
        .unwrap_or(u64::MAX)
}

/// Reward standing of one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAccount {
    pub account: AccountId,
    pub points: u64,
    /// Number of orders submitted
    pub total_trades: u64,
}

impl RewardAccount {
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            ..Default::default()
        }
    }
}

pub trait RewardsStore: Send + Sync {
    /// Add points and count one more order for `account`.
    fn award(&self, account: &AccountId, points: u64) -> Result<RewardAccount, StoreError>;

    /// Take back an award made by an intake that did not complete.
    fn revoke(&self, account: &AccountId, points: u64) -> Result<RewardAccount, StoreError>;

    /// Current standing; zero for accounts that never traded.
    fn get(&self, account: &AccountId) -> Result<RewardAccount, StoreError>;
}

/// In-memory rewards registry
#[derive(Debug, Default)]
pub struct InMemoryRewards {
    accounts: Mutex<HashMap<AccountId, RewardAccount>>,
}

impl InMemoryRewards {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<AccountId, RewardAccount>>, StoreError> {
        self.accounts
            .lock()
            .map_err(|_| StoreError::Unavailable("rewards lock poisoned".to_string()))
    }

    pub fn count(&self) -> usize {
        self.lock().map(|accounts| accounts.len()).unwrap_or(0)
    }
}

impl RewardsStore for InMemoryRewards {
    fn award(&self, account: &AccountId, points: u64) -> Result<RewardAccount, StoreError> {
        let mut accounts = self.lock()?;
        let entry = accounts
            .entry(account.clone())
            .or_insert_with(|| RewardAccount::new(account.clone()));
        entry.points = entry.points.saturating_add(points);
        entry.total_trades += 1;
        Ok(entry.clone())
    }

    fn revoke(&self, account: &AccountId, points: u64) -> Result<RewardAccount, StoreError> {
        let mut accounts = self.lock()?;
        let entry = accounts
            .entry(account.clone())
            .or_insert_with(|| RewardAccount::new(account.clone()));
        entry.points = entry.points.saturating_sub(points);
        entry.total_trades = entry.total_trades.saturating_sub(1);
        Ok(entry.clone())
    }

    fn get(&self, account: &AccountId) -> Result<RewardAccount, StoreError> {
        let accounts = self.lock()?;
        Ok(accounts
            .get(account)
            .cloned()
            .unwrap_or_else(|| RewardAccount::new(account.clone())))
    }
}
