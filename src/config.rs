//! Runtime configuration (§6, §G).
//!
//! Loaded from a YAML file with environment-variable overrides, the way
//! this codebase has always kept its ambient config: an `AppConfig` struct
//! deserialized with `serde`, then validated once at startup.

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine_id::EngineId;
use crate::error::AppError;

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "heteroledger.log".to_string()
}

fn default_account_range() -> u32 {
    795
}

fn default_seed_balance() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_rps() -> u32 {
    10
}

fn default_concurrency_cap() -> u32 {
    50
}

fn default_min_amount() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_max_amount() -> Decimal {
    Decimal::new(100_000, 0)
}

/// Crate-wide configuration, covering the generator (§4.3), the HTTP
/// surface (§6), and the ambient logging stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base URL the HTTP client and generator POST procedure calls to.
    pub base_url: String,

    /// Gates `/rdg/start`, `/rdg/stop`, `/system/reset`.
    pub control_password: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub log_rotation: String,

    #[serde(default = "default_rps")]
    pub rps: u32,
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: u32,
    #[serde(default)]
    pub active_engines: Vec<EngineId>,
    #[serde(default = "default_min_amount")]
    pub min_amount: Decimal,
    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
    #[serde(default)]
    pub allow_same_db: bool,

    #[serde(default = "default_account_range")]
    pub account_range: u32,
    #[serde(default = "default_seed_balance")]
    pub seed_balance: Decimal,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::ConfigError(format!("reading {}: {e}", path.as_ref().display())))?;
        let mut config: AppConfig =
            serde_yaml::from_str(&raw).map_err(|e| AppError::ConfigError(format!("parsing config: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `HETEROLEDGER_<FIELD>` overrides the matching YAML key, following
    /// the twelve-factor convention this codebase already leans on for
    /// container deployments.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HETEROLEDGER_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("HETEROLEDGER_CONTROL_PASSWORD") {
            self.control_password = v;
        }
        if let Ok(v) = std::env::var("HETEROLEDGER_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("HETEROLEDGER_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = std::env::var("HETEROLEDGER_RPS") {
            if let Ok(parsed) = v.parse() {
                self.rps = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.rps == 0 {
            return Err(AppError::ConfigError("rps must be > 0".into()));
        }
        if self.concurrency_cap == 0 {
            return Err(AppError::ConfigError("concurrency_cap must be > 0".into()));
        }
        if self.min_amount > self.max_amount {
            return Err(AppError::ConfigError("min_amount must be <= max_amount".into()));
        }
        if self.account_range == 0 {
            return Err(AppError::ConfigError("account_range must be > 0".into()));
        }
        if self.base_url.is_empty() {
            return Err(AppError::ConfigError("base_url must not be empty".into()));
        }
        let unique: HashSet<_> = self.active_engines.iter().map(|e| e.code()).collect();
        if unique.len() != self.active_engines.len() {
            return Err(AppError::ConfigError("active_engines must not repeat an engine".into()));
        }
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" | "INFO" | "WARN" | "ERROR" => {}
            other => return Err(AppError::ConfigError(format!("unrecognized log_level: {other}"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            listen_addr: default_listen_addr(),
            base_url: "http://127.0.0.1:8080".into(),
            control_password: "secret".into(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            log_json: false,
            log_rotation: "never".into(),
            rps: default_rps(),
            concurrency_cap: default_concurrency_cap(),
            active_engines: vec![EngineId::SqlA, EngineId::SqlB],
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            allow_same_db: true,
            account_range: default_account_range(),
            seed_balance: default_seed_balance(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_rps_rejected() {
        let mut cfg = base_config();
        cfg.rps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_amount_range_rejected() {
        let mut cfg = base_config();
        cfg.min_amount = Decimal::new(100, 0);
        cfg.max_amount = Decimal::new(10, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_active_engines_rejected() {
        let mut cfg = base_config();
        cfg.active_engines = vec![EngineId::SqlA, EngineId::SqlA];
        assert!(cfg.validate().is_err());
    }
}
