//! Procedure logic for the document-store engine, built on the [`DocStore`]
//! primitives. A direct re-expression of the six procedures in §4.1 against
//! a store with no multi-document transactions: each one is a short
//! sequence of independently-atomic conditional updates, safe to replay
//! because every write that matters is keyed by `idempotency_key`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::model::{HoldRecord, HoldStatus, LedgerEntry, TransactionRecord, TransactionStatus, TransactionType};
use crate::procedure::{EngineClient, ProcedureOutcome};

use super::DocStore;

pub struct DocProcedureService<S: DocStore> {
    store: Arc<S>,
}

impl<S: DocStore> DocProcedureService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn idem_insert_and_fetch(
        &self,
        idem: &str,
        src: u32,
        dst: u32,
        dst_bank: Option<&str>,
        amount: Decimal,
        txn_type: TransactionType,
        status: TransactionStatus,
    ) -> Result<TransactionRecord, AppError> {
        let candidate = TransactionRecord {
            txn_id: Ulid::new().to_string(),
            idempotency_key: idem.to_string(),
            txn_type,
            status,
            src_account: src,
            dst_account: dst,
            dst_bank: dst_bank.map(str::to_string),
            amount,
            created_at: Utc::now(),
        };
        self.store.idem_insert_transaction(candidate).await?;
        self.store
            .find_transaction(idem)
            .await?
            .ok_or_else(|| AppError::ProtocolError("transaction vanished after idempotent insert".into()))
    }
}

#[async_trait]
impl<S: DocStore + Send + Sync + 'static> EngineClient for DocProcedureService<S> {
    fn engine(&self) -> EngineId {
        EngineId::Doc
    }

    async fn remittance_hold(
        &self,
        src: u32,
        dst: u32,
        dst_bank: Option<&str>,
        amount: Decimal,
        idem: &str,
        txn_type: TransactionType,
    ) -> Result<ProcedureOutcome, AppError> {
        // Replay: a prior call already resolved this key to a terminal status.
        if let Some(existing) = self.store.find_transaction(idem).await? {
            return Ok(ProcedureOutcome {
                txn_id: Some(existing.txn_id),
                status: existing.status,
            });
        }

        let txn = self
            .idem_insert_and_fetch(idem, src, dst, dst_bank, amount, txn_type, TransactionStatus::Held)
            .await?;

        if !self.store.try_increment_hold(src, amount).await? {
            self.store.set_transaction_status(idem, TransactionStatus::Insufficient).await?;
            return Ok(ProcedureOutcome {
                txn_id: Some(txn.txn_id),
                status: TransactionStatus::Insufficient,
            });
        }

        self.store
            .idem_insert_hold(HoldRecord {
                idempotency_key: idem.to_string(),
                account_id: src,
                amount,
                status: HoldStatus::Active,
            })
            .await?;
        self.store.set_transaction_status(idem, TransactionStatus::Held).await?;

        Ok(ProcedureOutcome {
            txn_id: Some(txn.txn_id),
            status: TransactionStatus::Held,
        })
    }

    async fn remittance_release(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        let Some(hold) = self.store.find_hold(idem).await? else {
            // No hold was ever created (e.g. the hold attempt returned
            // Insufficient) — releasing is a harmless no-op.
            let txn_id = self.store.find_transaction(idem).await?.map(|t| t.txn_id);
            return Ok(ProcedureOutcome {
                txn_id,
                status: TransactionStatus::Released,
            });
        };

        let txn_id = self.store.find_transaction(idem).await?.map(|t| t.txn_id);

        match hold.status {
            HoldStatus::Captured => Ok(ProcedureOutcome {
                txn_id,
                status: TransactionStatus::Confirmed,
            }),
            HoldStatus::Released => Ok(ProcedureOutcome {
                txn_id,
                status: TransactionStatus::Released,
            }),
            HoldStatus::Active => {
                self.store.release_hold_amount(hold.account_id, hold.amount).await?;
                self.store.set_hold_status(idem, HoldStatus::Released).await?;
                self.store.set_transaction_status(idem, TransactionStatus::Released).await?;
                Ok(ProcedureOutcome {
                    txn_id,
                    status: TransactionStatus::Released,
                })
            }
        }
    }

    async fn receive_prepare(
        &self,
        src: u32,
        dst: u32,
        dst_bank: Option<&str>,
        amount: Decimal,
        idem: &str,
    ) -> Result<ProcedureOutcome, AppError> {
        if let Some(existing) = self.store.find_transaction(idem).await? {
            return Ok(ProcedureOutcome {
                txn_id: Some(existing.txn_id),
                status: existing.status,
            });
        }

        let txn = self
            .idem_insert_and_fetch(
                idem,
                src,
                dst,
                dst_bank,
                amount,
                TransactionType::IncomingExternal,
                TransactionStatus::Held,
            )
            .await?;

        if self.store.get_account(dst).await?.is_none() {
            self.store.set_transaction_status(idem, TransactionStatus::UnknownAccount).await?;
            return Ok(ProcedureOutcome {
                txn_id: Some(txn.txn_id),
                status: TransactionStatus::UnknownAccount,
            });
        }

        Ok(ProcedureOutcome {
            txn_id: Some(txn.txn_id),
            status: TransactionStatus::Held,
        })
    }

    async fn confirm_debit_local(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        let Some(txn) = self.store.find_transaction(idem).await? else {
            return Err(AppError::ProtocolError("confirm_debit_local: transaction not found".into()));
        };

        let Some(hold) = self.store.find_hold(idem).await? else {
            return Err(AppError::ProtocolError("confirm_debit_local: hold not found".into()));
        };

        match hold.status {
            HoldStatus::Released => Err(AppError::AlreadyReleased(idem.to_string())),
            HoldStatus::Captured => Ok(ProcedureOutcome {
                txn_id: Some(txn.txn_id),
                status: TransactionStatus::Confirmed,
            }),
            HoldStatus::Active => {
                if !self.store.try_capture_hold(txn.src_account, txn.amount).await? {
                    return Err(AppError::ConcurrencyFail);
                }

                self.store
                    .idem_insert_ledger_entry(LedgerEntry {
                        txn_id: txn.txn_id.clone(),
                        account_id: txn.src_account,
                        amount: -txn.amount,
                    })
                    .await?;
                self.store.set_hold_status(idem, HoldStatus::Captured).await?;
                self.store.set_transaction_status(idem, TransactionStatus::Confirmed).await?;

                Ok(ProcedureOutcome {
                    txn_id: Some(txn.txn_id),
                    status: TransactionStatus::Confirmed,
                })
            }
        }
    }

    async fn confirm_credit_local(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        let Some(txn) = self.store.find_transaction(idem).await? else {
            return Err(AppError::ProtocolError("confirm_credit_local: transaction not found".into()));
        };

        if self.store.find_ledger_entry(&txn.txn_id, txn.dst_account).await?.is_some() {
            self.store.set_transaction_status(idem, TransactionStatus::Confirmed).await?;
            return Ok(ProcedureOutcome {
                txn_id: Some(txn.txn_id),
                status: TransactionStatus::Confirmed,
            });
        }

        self.store.credit_balance(txn.dst_account, txn.amount).await?;
        self.store
            .idem_insert_ledger_entry(LedgerEntry {
                txn_id: txn.txn_id.clone(),
                account_id: txn.dst_account,
                amount: txn.amount,
            })
            .await?;
        self.store.set_transaction_status(idem, TransactionStatus::Confirmed).await?;

        Ok(ProcedureOutcome {
            txn_id: Some(txn.txn_id),
            status: TransactionStatus::Confirmed,
        })
    }

    async fn transfer_confirm_internal(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        let Some(txn) = self.store.find_transaction(idem).await? else {
            return Err(AppError::ProtocolError("transfer_confirm_internal: transaction not found".into()));
        };

        let hold = self.store.find_hold(idem).await?;

        if let Some(hold) = &hold {
            if hold.status == HoldStatus::Captured {
                return Ok(ProcedureOutcome {
                    txn_id: Some(txn.txn_id),
                    status: TransactionStatus::Confirmed,
                });
            }
        }

        match &hold {
            Some(_) => {
                if !self.store.try_capture_hold(txn.src_account, txn.amount).await? {
                    return Err(AppError::ConcurrencyFail);
                }
                self.store.set_hold_status(idem, HoldStatus::Captured).await?;
            }
            None => {
                if !self.store.try_debit_balance_no_hold(txn.src_account, txn.amount).await? {
                    return Err(AppError::InsufficientFunds);
                }
            }
        }

        self.store.credit_balance(txn.dst_account, txn.amount).await?;

        self.store
            .idem_insert_ledger_entry(LedgerEntry {
                txn_id: txn.txn_id.clone(),
                account_id: txn.src_account,
                amount: -txn.amount,
            })
            .await?;
        self.store
            .idem_insert_ledger_entry(LedgerEntry {
                txn_id: txn.txn_id.clone(),
                account_id: txn.dst_account,
                amount: txn.amount,
            })
            .await?;

        self.store.set_transaction_status(idem, TransactionStatus::Confirmed).await?;

        Ok(ProcedureOutcome {
            txn_id: Some(txn.txn_id),
            status: TransactionStatus::Confirmed,
        })
    }

    async fn reset(&self, seed_balance: Decimal, account_range: u32) -> Result<(), AppError> {
        self.store.reset(seed_balance, account_range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::docstore::memory::InMemoryDocStore;

    fn service() -> DocProcedureService<InMemoryDocStore> {
        DocProcedureService::new(Arc::new(InMemoryDocStore::new()))
    }

    #[tokio::test]
    async fn hold_then_capture_then_credit_conserves_funds() {
        let svc = service();
        svc.store.seed_account(100_001, Decimal::new(10_000, 0));
        svc.store.seed_account(100_002, Decimal::new(10_000, 0));

        let idem = "dd-1";
        let hold = svc
            .remittance_hold(100_001, 100_002, None, Decimal::new(1000, 0), idem, TransactionType::Internal)
            .await
            .unwrap();
        assert!(hold.is_held());

        let confirm = svc.transfer_confirm_internal(idem).await.unwrap();
        assert!(confirm.is_confirmed());

        let src = svc.store.get_account(100_001).await.unwrap().unwrap();
        let dst = svc.store.get_account(100_002).await.unwrap().unwrap();
        assert_eq!(src.balance, Decimal::new(9000, 0));
        assert_eq!(src.hold_amount, Decimal::ZERO);
        assert_eq!(dst.balance, Decimal::new(11_000, 0));
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_balances_untouched() {
        let svc = service();
        svc.store.seed_account(100_001, Decimal::new(400, 0));
        svc.store.seed_account(100_002, Decimal::new(0, 0));

        let idem = "dd-2";
        svc.store.idem_insert_transaction(TransactionRecord {
            txn_id: "t-2".into(),
            idempotency_key: idem.into(),
            txn_type: TransactionType::Internal,
            status: TransactionStatus::Held,
            src_account: 100_001,
            dst_account: 100_002,
            dst_bank: None,
            amount: Decimal::new(500, 0),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let err = svc.transfer_confirm_internal(idem).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));

        let src = svc.store.get_account(100_001).await.unwrap().unwrap();
        assert_eq!(src.balance, Decimal::new(400, 0));
    }

    #[tokio::test]
    async fn remittance_hold_is_idempotent() {
        let svc = service();
        svc.store.seed_account(200_001, Decimal::new(5000, 0));

        let idem = "aa-K";
        let first = svc
            .remittance_hold(200_001, 300_001, None, Decimal::new(2000, 0), idem, TransactionType::OutgoingExternal)
            .await
            .unwrap();
        let second = svc
            .remittance_hold(200_001, 300_001, None, Decimal::new(2000, 0), idem, TransactionType::OutgoingExternal)
            .await
            .unwrap();

        assert_eq!(first, second);
        let acct = svc.store.get_account(200_001).await.unwrap().unwrap();
        assert_eq!(acct.hold_amount, Decimal::new(2000, 0));
    }

    #[tokio::test]
    async fn release_after_hold_restores_balance() {
        let svc = service();
        svc.store.seed_account(100_001, Decimal::new(1000, 0));

        let idem = "dd-3";
        svc.remittance_hold(100_001, 300_001, None, Decimal::new(400, 0), idem, TransactionType::OutgoingExternal)
            .await
            .unwrap();

        let release = svc.remittance_release(idem).await.unwrap();
        assert_eq!(release.status, TransactionStatus::Released);

        let acct = svc.store.get_account(100_001).await.unwrap().unwrap();
        assert_eq!(acct.hold_amount, Decimal::ZERO);
        assert_eq!(acct.balance, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn release_never_undoes_a_capture() {
        let svc = service();
        svc.store.seed_account(100_001, Decimal::new(1000, 0));
        svc.store.seed_account(100_002, Decimal::new(0, 0));

        let idem = "dd-4";
        svc.remittance_hold(100_001, 100_002, None, Decimal::new(400, 0), idem, TransactionType::Internal)
            .await
            .unwrap();
        svc.transfer_confirm_internal(idem).await.unwrap();

        let release = svc.remittance_release(idem).await.unwrap();
        assert_eq!(release.status, TransactionStatus::Confirmed);

        let acct = svc.store.get_account(100_001).await.unwrap().unwrap();
        assert_eq!(acct.balance, Decimal::new(600, 0));
    }
}
