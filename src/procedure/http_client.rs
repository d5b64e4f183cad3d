//! HTTP Client with Retry (component E, §4.4).
//!
//! One [`HttpEngineClient`] per engine. Dispatches to `/db/proc/exec` for
//! the three SQL engines (each carrying the OUT-parameter descriptor its
//! dialect needs) and to `/mongo_proc/{op}` for the document store.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::model::{TransactionStatus, TransactionType};

use super::{EngineClient, ProcedureOutcome};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Per-engine OUT-parameter descriptor (§4.4, §9 "per-engine OUT-parameter
/// marshalling"). `None` for engines whose wire format carries no OUT
/// parameters at all (the document store, and `sql-c`'s stored functions,
/// whose outputs are ordinary result columns).
struct OutParamSpec {
    out_count: u32,
    out_types: &'static [&'static str],
    /// MySQL-style dialects want the positional `args` array padded with a
    /// placeholder for every OUT slot so it lines up with the procedure's
    /// declared signature.
    pad_args: bool,
    mode: &'static str,
}

fn out_spec(engine: EngineId) -> Option<OutParamSpec> {
    match engine {
        EngineId::SqlA => Some(OutParamSpec {
            out_count: 2,
            out_types: &["varchar", "varchar"],
            pad_args: true,
            mode: "proc",
        }),
        EngineId::SqlB => Some(OutParamSpec {
            out_count: 1,
            out_types: &["refcursor"],
            pad_args: false,
            mode: "proc",
        }),
        EngineId::SqlC => Some(OutParamSpec {
            out_count: 0,
            out_types: &[],
            pad_args: false,
            mode: "func",
        }),
        EngineId::Doc => None,
    }
}

fn procedure_name(op: &str) -> &'static str {
    match op {
        "remittance_hold" => "sp_remittance_hold",
        "remittance_release" => "sp_remittance_release",
        "receive_prepare" => "sp_receive_prepare",
        "confirm_debit_local" => "sp_confirm_debit_local",
        "confirm_credit_local" => "sp_confirm_credit_local",
        "transfer_confirm_internal" => "sp_transfer_confirm_internal",
        _ => "sp_unknown",
    }
}

fn mongo_op_path(op: &str) -> &'static str {
    match op {
        "remittance_hold" => "remittance/hold",
        "remittance_release" => "remittance/release",
        "receive_prepare" => "receive/prepare",
        "confirm_debit_local" => "confirm/debit/local",
        "confirm_credit_local" => "confirm/credit/local",
        "transfer_confirm_internal" => "transfer/confirm/internal",
        _ => "unknown",
    }
}

#[derive(Debug, Serialize)]
struct ProcExecBody {
    dbms: &'static str,
    name: &'static str,
    args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_types: Option<&'static [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    data: Option<ProcedureOutcome>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct HttpEngineClient {
    engine: EngineId,
    base_url: String,
    http: reqwest::Client,
}

impl HttpEngineClient {
    pub fn new(engine: EngineId, base_url: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))?;
        Ok(Self {
            engine,
            base_url: base_url.into(),
            http,
        })
    }

    fn classify(err: &reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::NetworkTimeout
        } else if err.is_connect() {
            AppError::NetworkReset
        } else if err.is_body() || err.is_decode() {
            AppError::Transport(format!("content-length-mismatch: {err}"))
        } else {
            AppError::Transport(err.to_string())
        }
    }

    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Envelope, AppError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = self.http.post(url).json(body).send().await;
            match result {
                Ok(resp) => {
                    // Neither 4xx nor 5xx-with-JSON-body is retried (§4.4);
                    // the envelope's own `error.code` carries the actual
                    // failure reason and is decoded by `finish()`.
                    let envelope: Envelope = resp
                        .json()
                        .await
                        .map_err(|e| AppError::ProtocolError(e.to_string()))?;
                    return Ok(envelope);
                }
                Err(e) => {
                    let classified = Self::classify(&e);
                    if !classified.is_retryable() || attempt == MAX_ATTEMPTS {
                        return Err(classified);
                    }
                    warn!(attempt, engine = %self.engine, "procedure call failed, retrying: {classified}");
                    last_err = Some(classified);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Transport("retry loop exited without error".into())))
    }

    async fn call_sql(&self, op: &str, args: Vec<Value>) -> Result<ProcedureOutcome, AppError> {
        let spec = out_spec(self.engine).expect("call_sql is only used for SQL engines");
        let mut args = args;
        if spec.pad_args {
            for _ in 0..spec.out_count {
                args.push(Value::Null);
            }
        }
        let body = ProcExecBody {
            dbms: self.engine.as_str(),
            name: procedure_name(op),
            args,
            out_count: (spec.out_count > 0).then_some(spec.out_count),
            out_types: (!spec.out_types.is_empty()).then_some(spec.out_types),
            mode: Some(spec.mode),
        };
        let url = format!("{}/db/proc/exec", self.base_url);
        let body = serde_json::to_value(&body).map_err(|e| AppError::ProtocolError(e.to_string()))?;
        self.finish(self.post_with_retry(&url, &body).await?)
    }

    async fn call_doc(&self, op: &str, body: Value) -> Result<ProcedureOutcome, AppError> {
        let url = format!("{}/mongo_proc/{}", self.base_url, mongo_op_path(op));
        self.finish(self.post_with_retry(&url, &body).await?)
    }

    fn finish(&self, envelope: Envelope) -> Result<ProcedureOutcome, AppError> {
        if envelope.ok {
            envelope
                .data
                .ok_or_else(|| AppError::ProtocolError("ok response missing data".into()))
        } else {
            let error = envelope.error.unwrap_or(ErrorBody {
                code: "UNKNOWN".into(),
                message: "procedure call failed".into(),
            });
            debug!(code = %error.code, engine = %self.engine, "procedure returned error envelope");
            match error.code.as_str() {
                "INSUFFICIENT_FUNDS" => Err(AppError::InsufficientFunds),
                "UNKNOWN_ACCOUNT" => Err(AppError::UnknownAccount(0)),
                "CONCURRENCY_FAIL" => Err(AppError::ConcurrencyFail),
                "ALREADY_RELEASED" => Err(AppError::AlreadyReleased(error.message)),
                "ENGINE_BUSY" => Err(AppError::EngineBusy(error.message)),
                _ => Err(AppError::ProtocolError(error.message)),
            }
        }
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    fn engine(&self) -> EngineId {
        self.engine
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
        if self.engine == EngineId::Doc {
            return self
                .call_doc(
                    "remittance_hold",
                    json!({
                        "src_account_id": src,
                        "dst_account_id": dst,
                        "dst_bank": dst_bank,
                        "amount": amount.to_string(),
                        "idempotency_key": idem,
                        "type": txn_type.as_wire_str(),
                    }),
                )
                .await;
        }
        self.call_sql(
            "remittance_hold",
            vec![
                json!(src),
                json!(dst),
                json!(dst_bank),
                json!(amount.to_string()),
                json!(idem),
                json!(txn_type.as_wire_str()),
            ],
        )
        .await
    }

    async fn remittance_release(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        if self.engine == EngineId::Doc {
            return self.call_doc("remittance_release", json!({"idempotency_key": idem})).await;
        }
        self.call_sql("remittance_release", vec![json!(idem)]).await
    }

    async fn receive_prepare(
        &self,
        src: u32,
        dst: u32,
        dst_bank: Option<&str>,
        amount: Decimal,
        idem: &str,
    ) -> Result<ProcedureOutcome, AppError> {
        if self.engine == EngineId::Doc {
            return self
                .call_doc(
                    "receive_prepare",
                    json!({
                        "src_account_id": src,
                        "dst_account_id": dst,
                        "dst_bank": dst_bank,
                        "amount": amount.to_string(),
                        "idempotency_key": idem,
                        "type": TransactionType::IncomingExternal.as_wire_str(),
                    }),
                )
                .await;
        }
        self.call_sql(
            "receive_prepare",
            vec![
                json!(src),
                json!(dst),
                json!(dst_bank),
                json!(amount.to_string()),
                json!(idem),
                json!(TransactionType::IncomingExternal.as_wire_str()),
            ],
        )
        .await
    }

    async fn confirm_debit_local(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        if self.engine == EngineId::Doc {
            return self.call_doc("confirm_debit_local", json!({"idempotency_key": idem})).await;
        }
        self.call_sql("confirm_debit_local", vec![json!(idem)]).await
    }

    async fn confirm_credit_local(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        if self.engine == EngineId::Doc {
            return self.call_doc("confirm_credit_local", json!({"idempotency_key": idem})).await;
        }
        self.call_sql("confirm_credit_local", vec![json!(idem)]).await
    }

    async fn transfer_confirm_internal(&self, idem: &str) -> Result<ProcedureOutcome, AppError> {
        if self.engine == EngineId::Doc {
            return self
                .call_doc("transfer_confirm_internal", json!({"idempotency_key": idem}))
                .await;
        }
        self.call_sql("transfer_confirm_internal", vec![json!(idem)]).await
    }

    async fn reset(&self, seed_balance: Decimal, account_range: u32) -> Result<(), AppError> {
        let url = format!("{}/system/reset/{}", self.base_url, self.engine.as_str());
        let body = json!({"seed_balance": seed_balance.to_string(), "account_range": account_range});
        let envelope = self.post_with_retry(&url, &body).await?;
        if envelope.ok {
            Ok(())
        } else {
            let error = envelope.error.unwrap_or(ErrorBody {
                code: "UNKNOWN".into(),
                message: "reset failed".into(),
            });
            match error.code.as_str() {
                "ENGINE_BUSY" => Err(AppError::EngineBusy(error.message)),
                _ => Err(AppError::ProtocolError(error.message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_a_pads_args_for_out_positions() {
        let spec = out_spec(EngineId::SqlA).unwrap();
        assert!(spec.pad_args);
        assert_eq!(spec.out_count, 2);
    }

    #[test]
    fn sql_b_uses_single_cursor_out_slot_without_padding() {
        let spec = out_spec(EngineId::SqlB).unwrap();
        assert!(!spec.pad_args);
        assert_eq!(spec.out_types, &["refcursor"]);
    }

    #[test]
    fn sql_c_is_stored_function_mode_with_no_out_params() {
        let spec = out_spec(EngineId::SqlC).unwrap();
        assert_eq!(spec.mode, "func");
        assert_eq!(spec.out_count, 0);
    }

    #[test]
    fn doc_engine_has_no_out_param_descriptor() {
        assert!(out_spec(EngineId::Doc).is_none());
    }
}
