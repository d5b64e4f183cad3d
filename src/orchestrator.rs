//! Transfer Orchestrator (component C, §4.2).
//!
//! Runs the four-step cross-engine choreography or the two-step
//! intra-engine variant, strictly sequenced, compensating on failure where
//! the protocol calls for it. Never panics: every outcome, including the
//! acknowledged reconciliation gap in step 4 (§9 open issue 1), comes back
//! as a typed [`TransferOutcome`].

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::model::TransactionType;
use crate::procedure::EngineClient;

/// A transfer request as synthesized by the generator or accepted from a
/// caller: everything the orchestrator needs and nothing it derives itself.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub src_engine: EngineId,
    pub dst_engine: EngineId,
    pub src_account: u32,
    pub dst_account: u32,
    pub dst_bank: Option<String>,
    pub amount: Decimal,
    pub idempotency_key: String,
}

/// The step at which a transfer failed, for logging and for the generator's
/// failure accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStep {
    SourceHold,
    DestinationPrepare,
    SourceConfirm,
    DestinationConfirm,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Both legs reached `CONFIRMED` (intra-engine) or the source was
    /// debited and the destination credited (cross-engine).
    Committed,
    /// Failed before any irrevocable debit; any hold taken was released.
    Failed { step: FailedStep, reason: String },
    /// Cross-engine step 4 (destination confirm-credit) failed after the
    /// source debit was already final. The debit cannot be undone; the
    /// incoming transaction on the destination is left `HELD` and is
    /// logged as abandoned. §9 open issue 1: no automatic reconciler exists.
    AbandonedIncoming { reason: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Committed)
    }
}

pub struct Orchestrator<'a> {
    clients: &'a dyn EngineLookup,
}

/// Resolves an [`EngineId`] to the client that talks to it. Kept as a
/// separate trait (rather than a `HashMap`) so callers can back it with
/// whatever registry shape fits — a fixed struct of four fields in
/// production, a single shared mock in tests.
pub trait EngineLookup: Send + Sync {
    fn client(&self, engine: EngineId) -> &dyn EngineClient;
}

/// Production [`EngineLookup`]: one client per engine, fixed at startup.
/// The document-store client is in-process ([`crate::procedure::docstore::service::DocProcedureService`]);
/// the three SQL engines are reached over HTTP since their stored
/// procedures are opaque, externally-owned services (§5).
pub struct FixedEngineLookup {
    pub doc: std::sync::Arc<dyn EngineClient>,
    pub sql_a: std::sync::Arc<dyn EngineClient>,
    pub sql_b: std::sync::Arc<dyn EngineClient>,
    pub sql_c: std::sync::Arc<dyn EngineClient>,
}

impl EngineLookup for FixedEngineLookup {
    fn client(&self, engine: EngineId) -> &dyn EngineClient {
        match engine {
            EngineId::Doc => self.doc.as_ref(),
            EngineId::SqlA => self.sql_a.as_ref(),
            EngineId::SqlB => self.sql_b.as_ref(),
            EngineId::SqlC => self.sql_c.as_ref(),
        }
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(clients: &'a dyn EngineLookup) -> Self {
        Self { clients }
    }

    pub async fn execute(&self, req: TransferRequest) -> TransferOutcome {
        if req.src_engine == req.dst_engine {
            self.execute_intra_engine(req).await
        } else {
            self.execute_cross_engine(req).await
        }
    }

    async fn execute_intra_engine(&self, req: TransferRequest) -> TransferOutcome {
        let engine = self.clients.client(req.src_engine);

        let hold = engine
            .remittance_hold(
                req.src_account,
                req.dst_account,
                req.dst_bank.as_deref(),
                req.amount,
                &req.idempotency_key,
                TransactionType::Internal,
            )
            .await;

        match hold {
            Ok(outcome) if outcome.is_held() => {}
            Ok(outcome) => {
                return TransferOutcome::Failed {
                    step: FailedStep::SourceHold,
                    reason: format!("unexpected status {:?}", outcome.status),
                };
            }
            Err(err) => {
                if err.is_retryable() {
                    // Lost reply: the hold may or may not have landed. Safety sweep.
                    let _ = engine.remittance_release(&req.idempotency_key).await;
                }
                return TransferOutcome::Failed {
                    step: FailedStep::SourceHold,
                    reason: err.to_string(),
                };
            }
        }

        match engine.transfer_confirm_internal(&req.idempotency_key).await {
            Ok(outcome) if outcome.is_confirmed() => TransferOutcome::Committed,
            Ok(outcome) => {
                let _ = engine.remittance_release(&req.idempotency_key).await;
                TransferOutcome::Failed {
                    step: FailedStep::SourceConfirm,
                    reason: format!("unexpected status {:?}", outcome.status),
                }
            }
            Err(err) => {
                let _ = engine.remittance_release(&req.idempotency_key).await;
                TransferOutcome::Failed {
                    step: FailedStep::SourceConfirm,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn execute_cross_engine(&self, req: TransferRequest) -> TransferOutcome {
        let src = self.clients.client(req.src_engine);
        let dst = self.clients.client(req.dst_engine);

        // Step 1: hold on the source.
        let hold = src
            .remittance_hold(
                req.src_account,
                req.dst_account,
                req.dst_bank.as_deref(),
                req.amount,
                &req.idempotency_key,
                TransactionType::OutgoingExternal,
            )
            .await;
        match &hold {
            Ok(outcome) if outcome.is_held() => {}
            Ok(outcome) => {
                return TransferOutcome::Failed {
                    step: FailedStep::SourceHold,
                    reason: format!("unexpected status {:?}", outcome.status),
                };
            }
            Err(err) => {
                if err.is_retryable() {
                    let _ = src.remittance_release(&req.idempotency_key).await;
                }
                return TransferOutcome::Failed {
                    step: FailedStep::SourceHold,
                    reason: err.to_string(),
                };
            }
        }

        // Step 2: prepare on the destination.
        let prepare = dst
            .receive_prepare(
                req.src_account,
                req.dst_account,
                req.dst_bank.as_deref(),
                req.amount,
                &req.idempotency_key,
            )
            .await;
        match &prepare {
            Ok(outcome) if outcome.is_held() => {}
            Ok(outcome) => {
                let _ = src.remittance_release(&req.idempotency_key).await;
                return TransferOutcome::Failed {
                    step: FailedStep::DestinationPrepare,
                    reason: format!("unexpected status {:?}", outcome.status),
                };
            }
            Err(err) => {
                let _ = src.remittance_release(&req.idempotency_key).await;
                return TransferOutcome::Failed {
                    step: FailedStep::DestinationPrepare,
                    reason: err.to_string(),
                };
            }
        }

        // Step 3: confirm the debit on the source. This is the point of no
        // return — after this succeeds, the credit on the destination must
        // eventually happen; the protocol provides no way back.
        match src.confirm_debit_local(&req.idempotency_key).await {
            Ok(outcome) if outcome.is_confirmed() => {}
            Ok(outcome) => {
                let _ = src.remittance_release(&req.idempotency_key).await;
                return TransferOutcome::Failed {
                    step: FailedStep::SourceConfirm,
                    reason: format!("unexpected status {:?}", outcome.status),
                };
            }
            Err(err) => {
                let _ = src.remittance_release(&req.idempotency_key).await;
                return TransferOutcome::Failed {
                    step: FailedStep::SourceConfirm,
                    reason: err.to_string(),
                };
            }
        }

        // Step 4: confirm the credit on the destination. Failure here is
        // logged, not compensated (§4.2, §9 open issue 1).
        match dst.confirm_credit_local(&req.idempotency_key).await {
            Ok(outcome) if outcome.is_confirmed() => {
                info!(idem = %req.idempotency_key, "transfer committed");
                TransferOutcome::Committed
            }
            Ok(outcome) => {
                let reason = format!("unexpected status {:?}", outcome.status);
                warn!(idem = %req.idempotency_key, %reason, "destination confirm-credit did not confirm; debit is final and unreconciled");
                TransferOutcome::AbandonedIncoming { reason }
            }
            Err(err) => {
                warn!(idem = %req.idempotency_key, error = %err, "destination confirm-credit failed; debit is final and unreconciled");
                TransferOutcome::AbandonedIncoming { reason: err.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::mock::MockEngineClient;
    use crate::procedure::ProcedureOutcome;
    use crate::model::TransactionStatus;

    struct TwoEngineLookup {
        src: MockEngineClient,
        dst: MockEngineClient,
    }

    impl EngineLookup for TwoEngineLookup {
        fn client(&self, engine: EngineId) -> &dyn EngineClient {
            if engine == self.src.engine() { &self.src } else { &self.dst }
        }
    }

    fn request(src_engine: EngineId, dst_engine: EngineId) -> TransferRequest {
        TransferRequest {
            src_engine,
            dst_engine,
            src_account: src_engine.account_id(1),
            dst_account: dst_engine.account_id(2),
            dst_bank: None,
            amount: Decimal::new(1000, 0),
            idempotency_key: "ab-test-key".into(),
        }
    }

    #[tokio::test]
    async fn cross_engine_happy_path_commits() {
        let lookup = TwoEngineLookup {
            src: MockEngineClient::new(EngineId::SqlA),
            dst: MockEngineClient::new(EngineId::SqlB),
        };
        let orchestrator = Orchestrator::new(&lookup);
        let outcome = orchestrator.execute(request(EngineId::SqlA, EngineId::SqlB)).await;
        assert_eq!(outcome, TransferOutcome::Committed);
        assert_eq!(lookup.src.hold_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(lookup.dst.receive_prepare_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn source_hold_insufficient_funds_fails_without_compensation() {
        let lookup = TwoEngineLookup {
            src: MockEngineClient::new(EngineId::SqlA),
            dst: MockEngineClient::new(EngineId::SqlB),
        };
        lookup.src.force(
            "remittance_hold",
            Ok(ProcedureOutcome { txn_id: Some("t".into()), status: TransactionStatus::Insufficient }),
        );
        let orchestrator = Orchestrator::new(&lookup);
        let outcome = orchestrator.execute(request(EngineId::SqlA, EngineId::SqlB)).await;
        assert!(matches!(outcome, TransferOutcome::Failed { step: FailedStep::SourceHold, .. }));
        assert_eq!(lookup.src.release_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn destination_prepare_failure_releases_source_hold() {
        let lookup = TwoEngineLookup {
            src: MockEngineClient::new(EngineId::SqlA),
            dst: MockEngineClient::new(EngineId::SqlB),
        };
        lookup.dst.force("receive_prepare", Err(AppError::UnknownAccount(300_002)));
        let orchestrator = Orchestrator::new(&lookup);
        let outcome = orchestrator.execute(request(EngineId::SqlA, EngineId::SqlB)).await;
        assert!(matches!(outcome, TransferOutcome::Failed { step: FailedStep::DestinationPrepare, .. }));
        assert_eq!(lookup.src.release_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn destination_confirm_failure_is_abandoned_not_compensated() {
        let lookup = TwoEngineLookup {
            src: MockEngineClient::new(EngineId::SqlA),
            dst: MockEngineClient::new(EngineId::SqlB),
        };
        lookup.dst.force("confirm_credit_local", Err(AppError::NetworkTimeout));
        let orchestrator = Orchestrator::new(&lookup);
        let outcome = orchestrator.execute(request(EngineId::SqlA, EngineId::SqlB)).await;
        assert!(matches!(outcome, TransferOutcome::AbandonedIncoming { .. }));
        // The source debit already happened and must never be rolled back here.
        assert_eq!(lookup.src.release_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn intra_engine_transfer_uses_two_step_protocol() {
        let lookup = TwoEngineLookup {
            src: MockEngineClient::new(EngineId::Doc),
            dst: MockEngineClient::new(EngineId::Doc),
        };
        let orchestrator = Orchestrator::new(&lookup);
        let outcome = orchestrator.execute(request(EngineId::Doc, EngineId::Doc)).await;
        assert_eq!(outcome, TransferOutcome::Committed);
        assert_eq!(lookup.src.confirm_internal_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(lookup.src.receive_prepare_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn network_timeout_on_hold_triggers_safety_sweep_release() {
        let lookup = TwoEngineLookup {
            src: MockEngineClient::new(EngineId::SqlA),
            dst: MockEngineClient::new(EngineId::SqlB),
        };
        lookup.src.force("remittance_hold", Err(AppError::NetworkTimeout));
        let orchestrator = Orchestrator::new(&lookup);
        let _ = orchestrator.execute(request(EngineId::SqlA, EngineId::SqlB)).await;
        assert_eq!(lookup.src.release_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
