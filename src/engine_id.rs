//! Engine identity and account-number encoding.
//!
//! Every account lives on exactly one engine. The engine is recoverable from
//! the account number alone: the leading digit of the (always six-digit)
//! account number is the engine code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One of the four independently-administered database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineId {
    /// Document store without multi-document transactions.
    Doc,
    /// SQL engine exposing stored procedures (MySQL-style OUT-parameter binding).
    SqlA,
    /// SQL engine exposing stored procedures (Oracle-style REF CURSOR binding).
    SqlB,
    /// SQL engine exposing stored functions (`SELECT * FROM fn(...)`).
    SqlC,
}

impl EngineId {
    pub const ALL: [EngineId; 4] = [EngineId::Doc, EngineId::SqlA, EngineId::SqlB, EngineId::SqlC];

    /// The leading digit of every account number owned by this engine.
    pub fn code(&self) -> u32 {
        match self {
            EngineId::Doc => 1,
            EngineId::SqlA => 2,
            EngineId::SqlB => 3,
            EngineId::SqlC => 4,
        }
    }

    /// Recover the engine from an account number's leading digit.
    pub fn from_account_id(account_id: u32) -> Result<Self, AppError> {
        match account_id / 100_000 {
            1 => Ok(EngineId::Doc),
            2 => Ok(EngineId::SqlA),
            3 => Ok(EngineId::SqlB),
            4 => Ok(EngineId::SqlC),
            _ => Err(AppError::ProtocolError(format!(
                "account {account_id} does not map to a known engine"
            ))),
        }
    }

    /// Build a six-digit account number from this engine's code and a
    /// within-range account index (`1..=account_range`).
    pub fn account_id(&self, index: u32) -> u32 {
        self.code() * 100_000 + index
    }

    /// First character of the kebab-case name, used to build idempotency keys
    /// (`K = first_char(S) + first_char(D) + "-" + ulid`).
    pub fn first_char(&self) -> char {
        match self {
            EngineId::Doc => 'd',
            EngineId::SqlA => 'a',
            EngineId::SqlB => 'b',
            EngineId::SqlC => 'c',
        }
    }

    /// True for the SQL engines, as opposed to the document store.
    pub fn is_sql(&self) -> bool {
        !matches!(self, EngineId::Doc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Doc => "doc",
            EngineId::SqlA => "sql-a",
            EngineId::SqlB => "sql-b",
            EngineId::SqlC => "sql-c",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doc" => Ok(EngineId::Doc),
            "sql-a" => Ok(EngineId::SqlA),
            "sql-b" => Ok(EngineId::SqlB),
            "sql-c" => Ok(EngineId::SqlC),
            other => Err(AppError::ConfigError(format!("unknown engine id: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_account_id() {
        for engine in EngineId::ALL {
            let account = engine.account_id(42);
            assert_eq!(EngineId::from_account_id(account).unwrap(), engine);
        }
    }

    #[test]
    fn encodes_leading_digit() {
        assert_eq!(EngineId::Doc.account_id(1), 100_001);
        assert_eq!(EngineId::SqlA.account_id(1), 200_001);
        assert_eq!(EngineId::SqlB.account_id(1), 300_001);
        assert_eq!(EngineId::SqlC.account_id(1), 400_001);
    }

    #[test]
    fn rejects_unknown_leading_digit() {
        assert!(EngineId::from_account_id(500_001).is_err());
    }

    #[test]
    fn parses_and_displays() {
        for engine in EngineId::ALL {
            assert_eq!(engine.as_str().parse::<EngineId>().unwrap(), engine);
        }
    }
}
