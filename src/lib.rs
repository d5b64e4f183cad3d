//! heteroledger-orchestrator - cross-engine transfer orchestration over
//! heterogeneous, transaction-less ledger backends.
//!
//! # Modules
//!
//! - [`engine_id`] - engine identity and account-number encoding
//! - [`error`] - crate-wide error taxonomy
//! - [`model`] - shared wire/storage types (accounts, transactions, holds, ledger entries)
//! - [`config`] - runtime configuration, loaded from YAML with env overrides
//! - [`logging`] - structured logging setup
//! - [`procedure`] - the six-procedure engine contract, its document-store realization, and the HTTP client
//! - [`orchestrator`] - the transfer state machine (intra- and cross-engine protocols)
//! - [`generator`] - the synthetic load generator
//! - [`reset`] - the reset coordinator
//! - [`http`] - the axum HTTP surface

pub mod config;
pub mod engine_id;
pub mod error;
pub mod generator;
pub mod http;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod procedure;
pub mod reset;

pub use config::AppConfig;
pub use engine_id::EngineId;
pub use error::AppError;
pub use orchestrator::{FailedStep, Orchestrator, TransferOutcome, TransferRequest};
