//! Data model shared by every engine's procedure layer (§3).

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction status, stringified as a single digit on the wire (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransactionStatus {
    Held = 1,
    Confirmed = 2,
    Released = 3,
    Insufficient = 5,
    UnknownAccount = 6,
}

impl TransactionStatus {
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(TransactionStatus::Held),
            2 => Some(TransactionStatus::Confirmed),
            3 => Some(TransactionStatus::Released),
            5 => Some(TransactionStatus::Insufficient),
            6 => Some(TransactionStatus::UnknownAccount),
            _ => None,
        }
    }

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            TransactionStatus::Held => "1",
            TransactionStatus::Confirmed => "2",
            TransactionStatus::Released => "3",
            TransactionStatus::Insufficient => "5",
            TransactionStatus::UnknownAccount => "6",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// Hold status (debit side only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum HoldStatus {
    Active = 1,
    Captured = 2,
    Released = 3,
}

impl HoldStatus {
    pub fn code(&self) -> i16 {
        *self as i16
    }
}

/// Transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransactionType {
    Internal = 1,
    OutgoingExternal = 2,
    IncomingExternal = 3,
}

impl TransactionType {
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            TransactionType::Internal => "1",
            TransactionType::OutgoingExternal => "2",
            TransactionType::IncomingExternal => "3",
        }
    }
}

/// An account at rest within one engine.
///
/// Invariant: `0 <= hold_amount <= balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: u32,
    pub balance: Decimal,
    pub hold_amount: Decimal,
}

impl Account {
    pub fn available(&self) -> Decimal {
        self.balance - self.hold_amount
    }

    pub fn is_consistent(&self) -> bool {
        self.hold_amount >= Decimal::ZERO && self.hold_amount <= self.balance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txn_id: String,
    pub idempotency_key: String,
    pub txn_type: TransactionType,
    pub status: TransactionStatus,
    pub src_account: u32,
    pub dst_account: u32,
    pub dst_bank: Option<String>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldRecord {
    pub idempotency_key: String,
    pub account_id: u32,
    pub amount: Decimal,
    pub status: HoldStatus,
}

/// One leg of a double-entry ledger posting. Negative amount = debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub txn_id: String,
    pub account_id: u32,
    pub amount: Decimal,
}

impl LedgerEntry {
    pub fn sign(&self) -> i8 {
        if self.amount.is_sign_negative() { -1 } else { 1 }
    }
}
