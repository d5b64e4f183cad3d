//! Document-store procedure layer (§4.1 "hard variant"): the document
//! database has no multi-document transactions, so every mutation below is
//! expressed as a single conditional document update, guarded by a
//! uniqueness constraint where idempotent replay must collapse to a no-op.
//!
//! [`DocStore`] is the storage primitive (one document collection per
//! concept, mirroring `accounts`/`transactions`/`holds`/`ledger_entries`).
//! [`service::DocProcedureService`] is the procedure logic built on top of
//! it, and is what actually implements [`super::EngineClient`] for the
//! document-store engine.

pub mod memory;
pub mod mongo;
pub mod service;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::model::{Account, HoldRecord, HoldStatus, LedgerEntry, TransactionRecord, TransactionStatus};

/// Atomic, per-document primitives the doc-store procedure layer is built
/// from. Every method here must be a single round-trip to the store so that
/// no method can partially apply under concurrent access.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn get_account(&self, account_id: u32) -> Result<Option<Account>, AppError>;

    /// `{_id: account_id, $expr: {$gte: [balance - hold_amount, amount]}} -> $inc hold_amount`.
    /// Returns whether the conditional update matched (and thus applied).
    async fn try_increment_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError>;

    /// `{_id: account_id, hold_amount: {$gte: amount}} -> $inc hold_amount: -amount, balance: -amount`.
    async fn try_capture_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError>;

    /// `{_id: account_id, balance: {$gte: amount}} -> $inc balance: -amount`. Used only by
    /// `transfer_confirm_internal` when no hold was taken first.
    async fn try_debit_balance_no_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError>;

    /// Unconditional credit leg: `$inc balance: amount`.
    async fn credit_balance(&self, account_id: u32, amount: Decimal) -> Result<(), AppError>;

    /// Unconditional release of a previously-incremented hold: `$inc hold_amount: -amount`.
    async fn release_hold_amount(&self, account_id: u32, amount: Decimal) -> Result<(), AppError>;

    /// Idempotent insert keyed on `idempotency_key`: a pre-existing document wins silently.
    async fn idem_insert_transaction(&self, txn: TransactionRecord) -> Result<(), AppError>;
    async fn find_transaction(&self, idem: &str) -> Result<Option<TransactionRecord>, AppError>;
    async fn set_transaction_status(&self, idem: &str, status: TransactionStatus) -> Result<(), AppError>;

    async fn idem_insert_hold(&self, hold: HoldRecord) -> Result<(), AppError>;
    async fn find_hold(&self, idem: &str) -> Result<Option<HoldRecord>, AppError>;
    async fn set_hold_status(&self, idem: &str, status: HoldStatus) -> Result<(), AppError>;

    /// `ledger_entries` unique on `(txn_id, account_id, sign(amount))`.
    async fn find_ledger_entry(&self, txn_id: &str, account_id: u32) -> Result<Option<LedgerEntry>, AppError>;
    async fn idem_insert_ledger_entry(&self, entry: LedgerEntry) -> Result<(), AppError>;

    /// Wipe transactions/holds/ledger entries and restore every account in
    /// `1..=account_range` to `seed_balance`, `hold_amount=0`.
    async fn reset(&self, seed_balance: Decimal, account_range: u32) -> Result<(), AppError>;
}
