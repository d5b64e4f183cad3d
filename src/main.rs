//! heteroledger-orchestrator entry point.
//!
//! Wires the runtime configuration, structured logging, the four engine
//! clients (document store in-process, the three SQL engines over HTTP),
//! the generator, the reset coordinator, and the axum HTTP surface.

use std::sync::Arc;

use heteroledger_orchestrator::config::AppConfig;
use heteroledger_orchestrator::engine_id::EngineId;
use heteroledger_orchestrator::generator::Generator;
use heteroledger_orchestrator::http::{self, AppState};
use heteroledger_orchestrator::logging::init_logging;
use heteroledger_orchestrator::orchestrator::FixedEngineLookup;
use heteroledger_orchestrator::procedure::docstore::memory::InMemoryDocStore;
use heteroledger_orchestrator::procedure::docstore::service::DocProcedureService;
use heteroledger_orchestrator::procedure::http_client::HttpEngineClient;

fn config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string())
}

#[tokio::main]
async fn main() {
    let config = match AppConfig::load(config_path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config);
    tracing::info!(listen_addr = %config.listen_addr, base_url = %config.base_url, "starting heteroledger-orchestrator");

    let doc_store = Arc::new(InMemoryDocStore::new());
    for index in 1..=config.account_range {
        doc_store.seed_account(EngineId::Doc.account_id(index), config.seed_balance);
    }
    let doc_client: Arc<dyn heteroledger_orchestrator::procedure::EngineClient> =
        Arc::new(DocProcedureService::new(doc_store));

    let sql_a = HttpEngineClient::new(EngineId::SqlA, config.base_url.clone()).expect("sql-a client");
    let sql_b = HttpEngineClient::new(EngineId::SqlB, config.base_url.clone()).expect("sql-b client");
    let sql_c = HttpEngineClient::new(EngineId::SqlC, config.base_url.clone()).expect("sql-c client");

    let engines = Arc::new(FixedEngineLookup {
        doc: doc_client,
        sql_a: Arc::new(sql_a),
        sql_b: Arc::new(sql_b),
        sql_c: Arc::new(sql_c),
    });

    let generator = Arc::new(Generator::new(engines.clone()));

    let state = Arc::new(AppState { config: config.clone(), engines, generator });

    let app = http::router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.listen_addr, "failed to bind listen address");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %config.listen_addr, "listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
