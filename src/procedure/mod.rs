//! The procedure layer (component B) and its client contract.
//!
//! [`EngineClient`] is the trait the Orchestrator (component C) programs
//! against. It has two implementations: [`http_client::HttpEngineClient`],
//! which speaks the wire protocol of §4.4/§6 to a real engine service, and
//! the document-store realization in [`docstore`], which *is* the procedure
//! layer rather than a client to one.

pub mod docstore;
pub mod http_client;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::model::{TransactionStatus, TransactionType};

/// Result of any of the six procedures: the (possibly pre-existing) txn id
/// and the terminal status reached. `txn_id` is absent for calls whose
/// transaction was never found (`confirm_debit_local`/`confirm_credit_local`/
/// `transfer_confirm_internal` against an unknown idempotency key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureOutcome {
    pub txn_id: Option<String>,
    pub status: TransactionStatus,
}

impl ProcedureOutcome {
    pub fn is_held(&self) -> bool {
        self.status == TransactionStatus::Held
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }
}

/// The six logical procedures exposed by every engine's procedure layer
/// (§4.1), each idempotent on `idem`.
#[async_trait]
pub trait EngineClient: Send + Sync {
    fn engine(&self) -> EngineId;

    #[allow(clippy::too_many_arguments)]
    async fn remittance_hold(
        &self,
        src: u32,
        dst: u32,
        dst_bank: Option<&str>,
        amount: Decimal,
        idem: &str,
        txn_type: TransactionType,
    ) -> Result<ProcedureOutcome, AppError>;

    async fn remittance_release(&self, idem: &str) -> Result<ProcedureOutcome, AppError>;

    async fn receive_prepare(
        &self,
        src: u32,
        dst: u32,
        dst_bank: Option<&str>,
        amount: Decimal,
        idem: &str,
    ) -> Result<ProcedureOutcome, AppError>;

    async fn confirm_debit_local(&self, idem: &str) -> Result<ProcedureOutcome, AppError>;

    async fn confirm_credit_local(&self, idem: &str) -> Result<ProcedureOutcome, AppError>;

    async fn transfer_confirm_internal(&self, idem: &str) -> Result<ProcedureOutcome, AppError>;

    /// Wipe this engine's transactions/holds/ledger and restore every
    /// account to its seed balance (§4.5). Engines reset independently;
    /// a lock-timeout surfaces as [`AppError::EngineBusy`] without retry.
    async fn reset(&self, seed_balance: Decimal, account_range: u32) -> Result<(), AppError>;
}

/// Test double standing in for a real [`EngineClient`], modeled on the
/// transfer module's `MockAdapter`: records call counts and lets a test
/// script failures or force particular statuses.
#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub struct MockEngineClient {
        engine: EngineId,
        pub hold_calls: AtomicUsize,
        pub release_calls: AtomicUsize,
        pub receive_prepare_calls: AtomicUsize,
        pub confirm_debit_calls: AtomicUsize,
        pub confirm_credit_calls: AtomicUsize,
        pub confirm_internal_calls: AtomicUsize,
        pub reset_calls: AtomicUsize,
        forced: Mutex<HashMap<&'static str, Result<ProcedureOutcome, AppError>>>,
    }

    impl MockEngineClient {
        pub fn new(engine: EngineId) -> Self {
            Self {
                engine,
                hold_calls: AtomicUsize::new(0),
                release_calls: AtomicUsize::new(0),
                receive_prepare_calls: AtomicUsize::new(0),
                confirm_debit_calls: AtomicUsize::new(0),
                confirm_credit_calls: AtomicUsize::new(0),
                confirm_internal_calls: AtomicUsize::new(0),
                reset_calls: AtomicUsize::new(0),
                forced: Mutex::new(HashMap::new()),
            }
        }

        /// Force the named operation's next (and every subsequent) result.
        pub fn force(&self, op: &'static str, result: Result<ProcedureOutcome, AppError>) {
            self.forced.lock().unwrap().insert(op, result);
        }

        fn resolve(&self, op: &'static str, default: TransactionStatus) -> Result<ProcedureOutcome, AppError> {
            if let Some(forced) = self.forced.lock().unwrap().get(op) {
                return forced.clone();
            }
            Ok(ProcedureOutcome {
                txn_id: Some(format!("{op}-txn")),
                status: default,
            })
        }
    }

    #[async_trait]
    impl EngineClient for MockEngineClient {
        fn engine(&self) -> EngineId {
            self.engine
        }

        async fn remittance_hold(
            &self,
            _src: u32,
            _dst: u32,
            _dst_bank: Option<&str>,
            _amount: Decimal,
            _idem: &str,
            _txn_type: TransactionType,
        ) -> Result<ProcedureOutcome, AppError> {
            self.hold_calls.fetch_add(1, Ordering::SeqCst);
            self.resolve("remittance_hold", TransactionStatus::Held)
        }

        async fn remittance_release(&self, _idem: &str) -> Result<ProcedureOutcome, AppError> {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            self.resolve("remittance_release", TransactionStatus::Released)
        }

        async fn receive_prepare(
            &self,
            _src: u32,
            _dst: u32,
            _dst_bank: Option<&str>,
            _amount: Decimal,
            _idem: &str,
        ) -> Result<ProcedureOutcome, AppError> {
            self.receive_prepare_calls.fetch_add(1, Ordering::SeqCst);
            self.resolve("receive_prepare", TransactionStatus::Held)
        }

        async fn confirm_debit_local(&self, _idem: &str) -> Result<ProcedureOutcome, AppError> {
            self.confirm_debit_calls.fetch_add(1, Ordering::SeqCst);
            self.resolve("confirm_debit_local", TransactionStatus::Confirmed)
        }

        async fn confirm_credit_local(&self, _idem: &str) -> Result<ProcedureOutcome, AppError> {
            self.confirm_credit_calls.fetch_add(1, Ordering::SeqCst);
            self.resolve("confirm_credit_local", TransactionStatus::Confirmed)
        }

        async fn transfer_confirm_internal(&self, _idem: &str) -> Result<ProcedureOutcome, AppError> {
            self.confirm_internal_calls.fetch_add(1, Ordering::SeqCst);
            self.resolve("transfer_confirm_internal", TransactionStatus::Confirmed)
        }

        async fn reset(&self, _seed_balance: Decimal, _account_range: u32) -> Result<(), AppError> {
            self.reset_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
