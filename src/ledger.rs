//! Balance-of-record store
//!
//! Every balance change goes through one of the operations below, each of
//! which runs under a single lock so no caller can observe half a transfer.
//! Balances never go negative.

use crate::types::{AccountId, Asset};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error(
        "insufficient {asset} balance for {account}: required {required}, available {available}"
    )]
    InsufficientBalance {
        account: AccountId,
        asset: Asset,
        required: Decimal,
        available: Decimal,
    },

    #[error("ledger storage unavailable: {0}")]
    Storage(String),
}

/// A signed balance change, one half of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account: AccountId,
    pub asset: Asset,
    pub delta: Decimal,
}

/// Storage service for per-(account, asset) balances
pub trait Ledger: Send + Sync {
    /// Available balance; an account that never held the asset reads as zero.
    fn balance(&self, account: &AccountId, asset: &Asset) -> Result<Decimal, LedgerError>;

    /// All non-absent balances of an account, sorted by asset
    fn balances(&self, account: &AccountId) -> Result<Vec<(Asset, Decimal)>, LedgerError>;

    /// Add funds, returning the new balance.
    fn credit(
        &self,
        account: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError>;

    /// Remove funds, returning the new balance. Fails untouched if short.
    fn debit(
        &self,
        account: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError>;

    /// Move `amount` of `asset` from one account to another.
    fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<(), LedgerError>;

    /// Apply a batch of postings all at once, or none of them if any
    /// resulting balance would be negative.
    fn apply(&self, postings: &[Posting]) -> Result<(), LedgerError>;
}

type Balances = HashMap<(AccountId, Asset), Decimal>;

/// In-memory ledger
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<Balances>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Balances>, LedgerError> {
        self.balances
            .lock()
            .map_err(|_| LedgerError::Storage("balance lock poisoned".to_string()))
    }

    fn check_amount(amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(())
    }

    fn available(balances: &Balances, account: &AccountId, asset: &Asset) -> Decimal {
        balances
            .get(&(account.clone(), asset.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn ensure_covered(
        balances: &Balances,
        account: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        let available = Self::available(balances, account, asset);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                asset: asset.clone(),
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn apply_locked(balances: &mut Balances, postings: &[Posting]) -> Result<(), LedgerError> {
        // Net per key first so a batch that debits and re-credits the same
        // account is judged on its final balance.
        let mut net: Balances = HashMap::new();
        for posting in postings {
            *net.entry((posting.account.clone(), posting.asset.clone()))
                .or_insert(Decimal::ZERO) += posting.delta;
        }

        for ((account, asset), delta) in &net {
            if *delta < Decimal::ZERO {
                Self::ensure_covered(balances, account, asset, -*delta)?;
            }
        }

        for (key, delta) in net {
            *balances.entry(key).or_insert(Decimal::ZERO) += delta;
        }
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn balance(&self, account: &AccountId, asset: &Asset) -> Result<Decimal, LedgerError> {
        let balances = self.lock()?;
        Ok(Self::available(&balances, account, asset))
    }

    fn balances(&self, account: &AccountId) -> Result<Vec<(Asset, Decimal)>, LedgerError> {
        let balances = self.lock()?;
        let mut held: Vec<(Asset, Decimal)> = balances
            .iter()
            .filter(|((owner, _), _)| owner == account)
            .map(|((_, asset), amount)| (asset.clone(), *amount))
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(held)
    }

    fn credit(
        &self,
        account: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        Self::check_amount(amount)?;
        let mut balances = self.lock()?;
        let balance = balances
            .entry((account.clone(), asset.clone()))
            .or_insert(Decimal::ZERO);
        *balance += amount;
        Ok(*balance)
    }

    fn debit(
        &self,
        account: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        Self::check_amount(amount)?;
        let mut balances = self.lock()?;
        Self::ensure_covered(&balances, account, asset, amount)?;
        let balance = balances
            .entry((account.clone(), asset.clone()))
            .or_insert(Decimal::ZERO);
        *balance -= amount;
        Ok(*balance)
    }

    fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        let mut balances = self.lock()?;
        // Checked up front so a self-transfer still needs the funds.
        Self::ensure_covered(&balances, from, asset, amount)?;
        Self::apply_locked(
            &mut balances,
            &[
                Posting {
                    account: from.clone(),
                    asset: asset.clone(),
                    delta: -amount,
                },
                Posting {
                    account: to.clone(),
                    asset: asset.clone(),
                    delta: amount,
                },
            ],
        )
    }

    fn apply(&self, postings: &[Posting]) -> Result<(), LedgerError> {
        let mut balances = self.lock()?;
        Self::apply_locked(&mut balances, postings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn bob() -> AccountId {
        AccountId::new("bob")
    }

    #[test]
    fn test_deposit_withdraw() {
        let ledger = InMemoryLedger::new();

        assert_eq!(ledger.credit(&alice(), &Asset::btc(), dec!(10)).unwrap(), dec!(10));
        assert_eq!(ledger.debit(&alice(), &Asset::btc(), dec!(4)).unwrap(), dec!(6));

        // Insufficient balance
        let err = ledger.debit(&alice(), &Asset::btc(), dec!(7)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(&alice(), &Asset::btc()).unwrap(), dec!(6));
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let ledger = InMemoryLedger::new();
        assert_eq!(
            ledger.credit(&alice(), &Asset::btc(), dec!(0)),
            Err(LedgerError::InvalidAmount(dec!(0)))
        );
        assert!(ledger.transfer(&alice(), &bob(), &Asset::btc(), dec!(-1)).is_err());
    }

    #[test]
    fn test_transfer_creates_receiver_row() {
        let ledger = InMemoryLedger::new();
        ledger.credit(&alice(), &Asset::btc(), dec!(10)).unwrap();

        ledger.transfer(&alice(), &bob(), &Asset::btc(), dec!(6)).unwrap();

        assert_eq!(ledger.balance(&alice(), &Asset::btc()).unwrap(), dec!(4));
        assert_eq!(ledger.balance(&bob(), &Asset::btc()).unwrap(), dec!(6));
        assert_eq!(ledger.balances(&bob()).unwrap(), vec![(Asset::btc(), dec!(6))]);
    }

    #[test]
    fn test_failed_transfer_mutates_nothing() {
        let ledger = InMemoryLedger::new();
        ledger.credit(&alice(), &Asset::btc(), dec!(2)).unwrap();

        let err = ledger.transfer(&alice(), &bob(), &Asset::btc(), dec!(3)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: alice(),
                asset: Asset::btc(),
                required: dec!(3),
                available: dec!(2),
            }
        );
        assert_eq!(ledger.balance(&alice(), &Asset::btc()).unwrap(), dec!(2));
        assert!(ledger.balances(&bob()).unwrap().is_empty());
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let ledger = InMemoryLedger::new();
        ledger.credit(&alice(), &Asset::btc(), dec!(5)).unwrap();

        let postings = vec![
            Posting {
                account: alice(),
                asset: Asset::btc(),
                delta: dec!(-5),
            },
            Posting {
                account: bob(),
                asset: Asset::btc(),
                delta: dec!(5),
            },
            Posting {
                account: bob(),
                asset: Asset::eth(),
                delta: dec!(-1),
            },
        ];
        assert!(ledger.apply(&postings).is_err());
        assert_eq!(ledger.balance(&alice(), &Asset::btc()).unwrap(), dec!(5));
        assert_eq!(ledger.balance(&bob(), &Asset::btc()).unwrap(), dec!(0));
    }

    #[test]
    fn test_concurrent_transfers_conserve_supply() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(&alice(), &Asset::btc(), dec!(100)).unwrap();
        ledger.credit(&bob(), &Asset::btc(), dec!(100)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let (from, to) = if i % 2 == 0 {
                        (alice(), bob())
                    } else {
                        (bob(), alice())
                    };
                    for _ in 0..50 {
                        let _ = ledger.transfer(&from, &to, &Asset::btc(), dec!(3));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let a = ledger.balance(&alice(), &Asset::btc()).unwrap();
        let b = ledger.balance(&bob(), &Asset::btc()).unwrap();
        assert_eq!(a + b, dec!(200));
        assert!(a >= Decimal::ZERO && b >= Decimal::ZERO);
    }
}
