//! In-process [`DocStore`] used by tests and by the conformance harness
//! that checks the real driver against this model (§9 open issue 2). No
//! external service required.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::model::{Account, HoldRecord, HoldStatus, LedgerEntry, TransactionRecord, TransactionStatus};

use super::DocStore;

#[derive(Default)]
struct State {
    accounts: HashMap<u32, Account>,
    transactions: HashMap<String, TransactionRecord>,
    holds: HashMap<String, HoldRecord>,
    ledger: Vec<LedgerEntry>,
}

pub struct InMemoryDocStore {
    state: Mutex<State>,
}

impl InMemoryDocStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Seed one account. Used by tests and by [`DocStore::reset`].
    pub fn seed_account(&self, account_id: u32, balance: Decimal) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(
            account_id,
            Account {
                account_id,
                balance,
                hold_amount: Decimal::ZERO,
            },
        );
    }
}

impl Default for InMemoryDocStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocStore for InMemoryDocStore {
    async fn get_account(&self, account_id: u32) -> Result<Option<Account>, AppError> {
        Ok(self.state.lock().unwrap().accounts.get(&account_id).cloned())
    }

    async fn try_increment_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(acct) = state.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        if acct.balance - acct.hold_amount >= amount {
            acct.hold_amount += amount;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn try_capture_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(acct) = state.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        if acct.hold_amount >= amount {
            acct.hold_amount -= amount;
            acct.balance -= amount;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn try_debit_balance_no_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(acct) = state.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        if acct.balance >= amount {
            acct.balance -= amount;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn credit_balance(&self, account_id: u32, amount: Decimal) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let acct = state
            .accounts
            .entry(account_id)
            .or_insert_with(|| Account {
                account_id,
                balance: Decimal::ZERO,
                hold_amount: Decimal::ZERO,
            });
        acct.balance += amount;
        Ok(())
    }

    async fn release_hold_amount(&self, account_id: u32, amount: Decimal) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(acct) = state.accounts.get_mut(&account_id) {
            acct.hold_amount -= amount;
        }
        Ok(())
    }

    async fn idem_insert_transaction(&self, txn: TransactionRecord) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state
            .transactions
            .entry(txn.idempotency_key.clone())
            .or_insert(txn);
        Ok(())
    }

    async fn find_transaction(&self, idem: &str) -> Result<Option<TransactionRecord>, AppError> {
        Ok(self.state.lock().unwrap().transactions.get(idem).cloned())
    }

    async fn set_transaction_status(&self, idem: &str, status: TransactionStatus) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(txn) = state.transactions.get_mut(idem) {
            txn.status = status;
        }
        Ok(())
    }

    async fn idem_insert_hold(&self, hold: HoldRecord) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.holds.entry(hold.idempotency_key.clone()).or_insert(hold);
        Ok(())
    }

    async fn find_hold(&self, idem: &str) -> Result<Option<HoldRecord>, AppError> {
        Ok(self.state.lock().unwrap().holds.get(idem).cloned())
    }

    async fn set_hold_status(&self, idem: &str, status: HoldStatus) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(hold) = state.holds.get_mut(idem) {
            hold.status = status;
        }
        Ok(())
    }

    async fn find_ledger_entry(&self, txn_id: &str, account_id: u32) -> Result<Option<LedgerEntry>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ledger
            .iter()
            .find(|e| e.txn_id == txn_id && e.account_id == account_id)
            .cloned())
    }

    async fn idem_insert_ledger_entry(&self, entry: LedgerEntry) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let exists = state
            .ledger
            .iter()
            .any(|e| e.txn_id == entry.txn_id && e.account_id == entry.account_id);
        if !exists {
            state.ledger.push(entry);
        }
        Ok(())
    }

    async fn reset(&self, seed_balance: Decimal, account_range: u32) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.transactions.clear();
        state.holds.clear();
        state.ledger.clear();
        for index in 1..=account_range {
            let account_id = EngineId::Doc.account_id(index);
            state.accounts.insert(
                account_id,
                Account {
                    account_id,
                    balance: seed_balance,
                    hold_amount: Decimal::ZERO,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_increment_hold_respects_available_funds() {
        let store = InMemoryDocStore::new();
        store.seed_account(100_001, Decimal::new(1000, 0));

        assert!(store.try_increment_hold(100_001, Decimal::new(1000, 0)).await.unwrap());
        assert!(!store.try_increment_hold(100_001, Decimal::new(1, 0)).await.unwrap());

        let acct = store.get_account(100_001).await.unwrap().unwrap();
        assert_eq!(acct.hold_amount, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn capture_then_release_round_trips() {
        let store = InMemoryDocStore::new();
        store.seed_account(100_001, Decimal::new(1000, 0));
        store.try_increment_hold(100_001, Decimal::new(400, 0)).await.unwrap();

        store.release_hold_amount(100_001, Decimal::new(400, 0)).await.unwrap();
        let acct = store.get_account(100_001).await.unwrap().unwrap();
        assert_eq!(acct.hold_amount, Decimal::ZERO);
        assert_eq!(acct.balance, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn idem_insert_transaction_keeps_first_write() {
        let store = InMemoryDocStore::new();
        let first = TransactionRecord {
            txn_id: "t1".into(),
            idempotency_key: "K".into(),
            txn_type: crate::model::TransactionType::Internal,
            status: TransactionStatus::Held,
            src_account: 1,
            dst_account: 2,
            dst_bank: None,
            amount: Decimal::new(100, 0),
            created_at: chrono::Utc::now(),
        };
        let mut second = first.clone();
        second.txn_id = "t2".into();

        store.idem_insert_transaction(first).await.unwrap();
        store.idem_insert_transaction(second).await.unwrap();

        let found = store.find_transaction("K").await.unwrap().unwrap();
        assert_eq!(found.txn_id, "t1");
    }
}
