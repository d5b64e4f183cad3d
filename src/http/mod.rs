//! HTTP Surface & Admin (component J, §6).
//!
//! Exposes `/mongo_proc/{op}` (the document store's procedure layer,
//! in-process), `/rdg/start|stop|status` (generator control), `/system/reset`
//! (admin), and `/healthz`. The three SQL engines' stored procedures are an
//! opaque external contract (§5) this process only ever *calls*, never
//! serves, so `/db/proc/exec` has no handler here.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::generator::{Generator, GeneratorConfig};
use crate::model::TransactionType;
use crate::orchestrator::FixedEngineLookup;
use crate::procedure::EngineClient;
use crate::reset::ResetCoordinator;

pub struct AppState {
    pub config: AppConfig,
    pub engines: Arc<FixedEngineLookup>,
    pub generator: Arc<Generator<FixedEngineLookup>>,
}

impl AppState {
    fn doc(&self) -> &dyn EngineClient {
        self.engines.doc.as_ref()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/mongo_proc/{op}", post(mongo_proc))
        .route("/rdg/start", post(rdg_start))
        .route("/rdg/stop", post(rdg_stop))
        .route("/rdg/status", get(rdg_status))
        .route("/system/reset", post(system_reset))
        .with_state(state)
}

/// Wire envelope for every route here: `{ok, data}` on success, `{ok,
/// error: {code, message}}` otherwise (§6, matching the procedure layer's
/// own envelope).
#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl<T: Serialize> Envelope<T> {
    fn ok(data: T) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Envelope::<()> { ok: false, data: None, error: Some(ErrorBody { code: self.code(), message: self.to_string() }) };
        (status, Json(body)).into_response()
    }
}

async fn healthz() -> impl IntoResponse {
    Json(Envelope::ok(serde_json::json!({"status": "ok"})))
}

fn check_password(config: &AppConfig, given: &str) -> Result<(), AppError> {
    if given != config.control_password {
        return Err(AppError::BadRequest("invalid control password".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MongoProcBody {
    #[serde(default)]
    src_account_id: Option<u32>,
    #[serde(default)]
    dst_account_id: Option<u32>,
    #[serde(default)]
    dst_bank: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    idempotency_key: String,
    #[serde(default)]
    r#type: Option<String>,
}

async fn mongo_proc(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Json(body): Json<MongoProcBody>,
) -> Result<impl IntoResponse, AppError> {
    let idem = body.idempotency_key.as_str();
    let outcome = match op.as_str() {
        "init/indexes" => {
            // §9: index creation is a one-time admin action against the real
            // driver; the in-process/model store needs no explicit indexes.
            return Ok(Json(Envelope::ok(serde_json::json!({"created": true}))));
        }
        "remittance/hold" => {
            let amount = parse_amount(body.amount.as_deref())?;
            let txn_type = match body.r#type.as_deref() {
                Some("1") => TransactionType::Internal,
                Some("3") => TransactionType::IncomingExternal,
                _ => TransactionType::OutgoingExternal,
            };
            state
                .doc()
                .remittance_hold(
                    body.src_account_id.ok_or_else(|| AppError::BadRequest("src_account_id required".into()))?,
                    body.dst_account_id.ok_or_else(|| AppError::BadRequest("dst_account_id required".into()))?,
                    body.dst_bank.as_deref(),
                    amount,
                    idem,
                    txn_type,
                )
                .await?
        }
        "remittance/release" => state.doc().remittance_release(idem).await?,
        "receive/prepare" => {
            let amount = parse_amount(body.amount.as_deref())?;
            state
                .doc()
                .receive_prepare(
                    body.src_account_id.ok_or_else(|| AppError::BadRequest("src_account_id required".into()))?,
                    body.dst_account_id.ok_or_else(|| AppError::BadRequest("dst_account_id required".into()))?,
                    body.dst_bank.as_deref(),
                    amount,
                    idem,
                )
                .await?
        }
        "confirm/debit/local" => state.doc().confirm_debit_local(idem).await?,
        "confirm/credit/local" => state.doc().confirm_credit_local(idem).await?,
        "transfer/confirm/internal" => state.doc().transfer_confirm_internal(idem).await?,
        other => return Err(AppError::BadRequest(format!("unknown mongo_proc operation: {other}"))),
    };
    Ok(Json(Envelope::ok(outcome)))
}

fn parse_amount(raw: Option<&str>) -> Result<Decimal, AppError> {
    raw.ok_or_else(|| AppError::BadRequest("amount required".into()))?
        .parse()
        .map_err(|_| AppError::BadRequest("amount must be a decimal string".into()))
}

#[derive(Debug, Deserialize)]
struct RdgStartBody {
    password: String,
    rps: u32,
    concurrent: u32,
    active_dbms: Vec<EngineId>,
    min_amount: Decimal,
    max_amount: Decimal,
    #[serde(default)]
    allow_same_db: bool,
}

async fn rdg_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RdgStartBody>,
) -> Result<impl IntoResponse, AppError> {
    check_password(&state.config, &body.password)?;
    state
        .generator
        .start(GeneratorConfig {
            rps: body.rps,
            concurrency_cap: body.concurrent,
            active_engines: body.active_dbms,
            min_amount: body.min_amount,
            max_amount: body.max_amount,
            allow_same_db: body.allow_same_db,
            account_range: state.config.account_range,
        })
        .await?;
    Ok(Json(Envelope::ok(serde_json::json!({"started": true}))))
}

#[derive(Debug, Deserialize)]
struct PasswordBody {
    password: String,
}

async fn rdg_stop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PasswordBody>,
) -> Result<impl IntoResponse, AppError> {
    check_password(&state.config, &body.password)?;
    state.generator.stop().await?;
    Ok(Json(Envelope::ok(serde_json::json!({"stopped": true}))))
}

async fn rdg_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.generator.status().await;
    let cfg_value: Value = status
        .config
        .as_ref()
        .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);
    Json(Envelope::ok(serde_json::json!({
        "running": status.running,
        "cfg": cfg_value,
        "stats": status.stats,
    })))
}

async fn system_reset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PasswordBody>,
) -> Result<impl IntoResponse, AppError> {
    check_password(&state.config, &body.password)?;
    let coordinator = ResetCoordinator::new(state.engines.as_ref(), state.generator.as_ref());
    let results = coordinator
        .reset_all(&state.config.active_engines, state.config.seed_balance, state.config.account_range)
        .await?;
    let mut ok = true;
    let mut per_engine = serde_json::Map::new();
    for (engine, result) in results {
        match result {
            Ok(()) => {
                per_engine.insert(engine.to_string(), serde_json::json!("ok"));
            }
            Err(err) => {
                ok = false;
                per_engine.insert(engine.to_string(), serde_json::json!(err.to_string()));
            }
        }
    }
    Ok(Json(Envelope::ok(serde_json::json!({"ok": ok, "engines": per_engine}))))
}
