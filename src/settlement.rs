//! Staged balance transfers for a single order intake
//!
//! Transfers made while matching are held here and only reach the ledger on
//! `commit`, as one batch. Dropping a settlement without committing leaves
//! the ledger untouched.

use crate::ledger::{Ledger, LedgerError, Posting};
use crate::types::{AccountId, Asset};
use rust_decimal::Decimal;
use std::collections::HashMap;

pub struct Settlement<'a> {
    ledger: &'a dyn Ledger,
    asset: Asset,
    /// Net staged change per account
    pending: HashMap<AccountId, Decimal>,
    postings: Vec<Posting>,
}

impl<'a> Settlement<'a> {
    pub fn new(ledger: &'a dyn Ledger, asset: Asset) -> Self {
        Self {
            ledger,
            asset,
            pending: HashMap::new(),
            postings: Vec::new(),
        }
    }

    /// Ledger balance with the transfers staged so far applied
    pub fn available(&self, account: &AccountId) -> Result<Decimal, LedgerError> {
        let committed = self.ledger.balance(account, &self.asset)?;
        let staged = self.pending.get(account).copied().unwrap_or(Decimal::ZERO);
        Ok(committed + staged)
    }

    /// Stage a transfer. Same contract as `Ledger::transfer`: a positive
    /// amount, and the sender must cover it, otherwise nothing is staged.
    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let available = self.available(from)?;
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from.clone(),
                asset: self.asset.clone(),
                required: amount,
                available,
            });
        }

        *self.pending.entry(from.clone()).or_insert(Decimal::ZERO) -= amount;
        *self.pending.entry(to.clone()).or_insert(Decimal::ZERO) += amount;
        self.postings.push(Posting {
            account: from.clone(),
            asset: self.asset.clone(),
            delta: -amount,
        });
        self.postings.push(Posting {
            account: to.clone(),
            asset: self.asset.clone(),
            delta: amount,
        });
        Ok(())
    }

    /// Write every staged transfer to the ledger in one atomic batch.
    pub fn commit(self) -> Result<(), LedgerError> {
        if self.postings.is_empty() {
            return Ok(());
        }
        self.ledger.apply(&self.postings)
    }
}
