//! Real [`DocStore`] realization backed by a document database, reachable
//! over the official async driver. Collections mirror the Python reference
//! this was modeled on: `accounts`, `transactions`, `holds`,
//! `ledger_entries`, each carrying amounts as `Decimal128` so arithmetic
//! never loses precision to a binary float.
//!
//! §9 open issue 2: every comparison here normalizes both operands through
//! [`to_decimal128`]/[`from_decimal128`] (string round-trip) before it
//! reaches the driver, rather than trusting the driver's own coercion
//! between `Decimal128` and whatever numeric type a filter literal has.

use std::str::FromStr;

use async_trait::async_trait;
use bson::{Bson, Decimal128, Document, doc};
use chrono::{DateTime, Utc};
use mongodb::Database;
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Collection, IndexModel};
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::model::{Account, HoldRecord, HoldStatus, LedgerEntry, TransactionRecord, TransactionStatus, TransactionType};

use super::DocStore;

pub fn to_decimal128(d: Decimal) -> Result<Decimal128, AppError> {
    Decimal128::from_str(&d.to_string()).map_err(|e| AppError::StorageError(format!("decimal128 encode: {e}")))
}

pub fn from_decimal128(d: &Decimal128) -> Result<Decimal, AppError> {
    Decimal::from_str(&d.to_string()).map_err(|e| AppError::StorageError(format!("decimal128 decode: {e}")))
}

fn db_err(e: mongodb::error::Error) -> AppError {
    AppError::StorageError(e.to_string())
}

pub struct MongoDocStore {
    accounts: Collection<Document>,
    transactions: Collection<Document>,
    holds: Collection<Document>,
    ledger: Collection<Document>,
}

impl MongoDocStore {
    pub fn new(db: &Database) -> Self {
        Self {
            accounts: db.collection("accounts"),
            transactions: db.collection("transactions"),
            holds: db.collection("holds"),
            ledger: db.collection("ledger_entries"),
        }
    }

    /// Equivalent of `ensure_indexes()` in the Python reference: unique
    /// indexes on the idempotency keys and on the ledger's dedup tuple.
    pub async fn ensure_indexes(&self) -> Result<(), AppError> {
        let unique = IndexOptions::builder().unique(true).build();
        self.transactions
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"idempotency_key": 1})
                    .options(unique.clone())
                    .build(),
            )
            .await
            .map_err(db_err)?;
        self.holds
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"idempotency_key": 1})
                    .options(unique.clone())
                    .build(),
            )
            .await
            .map_err(db_err)?;
        self.ledger
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"txn_id": 1, "account_id": 1, "amount_sign": 1})
                    .options(unique)
                    .build(),
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    fn account_doc(account: &Account) -> Result<Document, AppError> {
        Ok(doc! {
            "_id": account.account_id as i64,
            "balance": to_decimal128(account.balance)?,
            "hold_amount": to_decimal128(account.hold_amount)?,
        })
    }

    fn account_from_doc(doc: &Document) -> Result<Account, AppError> {
        let account_id = doc
            .get_i64("_id")
            .map_err(|_| AppError::ProtocolError("account document missing _id".into()))? as u32;
        let balance = from_decimal128(
            doc.get("balance")
                .and_then(Bson::as_decimal128)
                .ok_or_else(|| AppError::ProtocolError("account document missing balance".into()))?,
        )?;
        let hold_amount = from_decimal128(
            doc.get("hold_amount")
                .and_then(Bson::as_decimal128)
                .ok_or_else(|| AppError::ProtocolError("account document missing hold_amount".into()))?,
        )?;
        Ok(Account {
            account_id,
            balance,
            hold_amount,
        })
    }

    fn txn_from_doc(doc: &Document, idem: &str) -> Result<TransactionRecord, AppError> {
        let status_code = doc
            .get_str("status")
            .map_err(|_| AppError::ProtocolError("transaction missing status".into()))?
            .parse::<i16>()
            .map_err(|_| AppError::ProtocolError("transaction status not numeric".into()))?;
        let type_code = doc
            .get_str("type")
            .map_err(|_| AppError::ProtocolError("transaction missing type".into()))?
            .parse::<i16>()
            .map_err(|_| AppError::ProtocolError("transaction type not numeric".into()))?;
        let txn_type = match type_code {
            1 => TransactionType::Internal,
            2 => TransactionType::OutgoingExternal,
            _ => TransactionType::IncomingExternal,
        };
        let status = TransactionStatus::from_code(status_code)
            .ok_or_else(|| AppError::ProtocolError("unrecognized transaction status".into()))?;
        Ok(TransactionRecord {
            txn_id: doc
                .get_object_id("_id")
                .map(|id| id.to_hex())
                .unwrap_or_else(|_| idem.to_string()),
            idempotency_key: idem.to_string(),
            txn_type,
            status,
            src_account: doc.get_i64("src_account_id").unwrap_or_default() as u32,
            dst_account: doc.get_i64("dst_account_id").unwrap_or_default() as u32,
            dst_bank: doc.get_str("dst_bank").ok().map(str::to_string),
            amount: from_decimal128(
                doc.get("amount")
                    .and_then(Bson::as_decimal128)
                    .ok_or_else(|| AppError::ProtocolError("transaction missing amount".into()))?,
            )?,
            created_at: doc
                .get_datetime("created_at")
                .map(|dt| DateTime::<Utc>::from(*dt))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[async_trait]
impl DocStore for MongoDocStore {
    async fn get_account(&self, account_id: u32) -> Result<Option<Account>, AppError> {
        let doc = self
            .accounts
            .find_one(doc! {"_id": account_id as i64})
            .await
            .map_err(db_err)?;
        doc.as_ref().map(Self::account_from_doc).transpose()
    }

    async fn try_increment_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError> {
        let amount128 = to_decimal128(amount)?;
        let result = self
            .accounts
            .update_one(
                doc! {
                    "_id": account_id as i64,
                    "$expr": {"$gte": [{"$subtract": ["$balance", "$hold_amount"]}, amount128.clone()]},
                },
                doc! {"$inc": {"hold_amount": amount128}},
            )
            .await
            .map_err(db_err)?;
        Ok(result.modified_count == 1)
    }

    async fn try_capture_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError> {
        let amount128 = to_decimal128(amount)?;
        let neg = to_decimal128(-amount)?;
        let result = self
            .accounts
            .update_one(
                doc! {"_id": account_id as i64, "hold_amount": {"$gte": amount128}},
                doc! {"$inc": {"hold_amount": neg.clone(), "balance": neg}},
            )
            .await
            .map_err(db_err)?;
        Ok(result.modified_count == 1)
    }

    async fn try_debit_balance_no_hold(&self, account_id: u32, amount: Decimal) -> Result<bool, AppError> {
        let amount128 = to_decimal128(amount)?;
        let neg = to_decimal128(-amount)?;
        let result = self
            .accounts
            .update_one(
                doc! {"_id": account_id as i64, "balance": {"$gte": amount128}},
                doc! {"$inc": {"balance": neg}},
            )
            .await
            .map_err(db_err)?;
        Ok(result.modified_count == 1)
    }

    async fn credit_balance(&self, account_id: u32, amount: Decimal) -> Result<(), AppError> {
        let amount128 = to_decimal128(amount)?;
        self.accounts
            .update_one(doc! {"_id": account_id as i64}, doc! {"$inc": {"balance": amount128}})
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn release_hold_amount(&self, account_id: u32, amount: Decimal) -> Result<(), AppError> {
        let neg = to_decimal128(-amount)?;
        self.accounts
            .update_one(doc! {"_id": account_id as i64}, doc! {"$inc": {"hold_amount": neg}})
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn idem_insert_transaction(&self, txn: TransactionRecord) -> Result<(), AppError> {
        let existing = self
            .transactions
            .find_one(doc! {"idempotency_key": &txn.idempotency_key})
            .await
            .map_err(db_err)?;
        if existing.is_some() {
            return Ok(());
        }
        let document = doc! {
            "idempotency_key": &txn.idempotency_key,
            "type": txn.txn_type.code().to_string(),
            "status": txn.status.as_wire_str(),
            "src_account_id": txn.src_account as i64,
            "dst_account_id": txn.dst_account as i64,
            "dst_bank": txn.dst_bank.clone().unwrap_or_default(),
            "amount": to_decimal128(txn.amount)?,
            "created_at": bson::DateTime::from_chrono(txn.created_at),
        };
        match self.transactions.insert_one(document).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("E11000") => Ok(()),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find_transaction(&self, idem: &str) -> Result<Option<TransactionRecord>, AppError> {
        let doc = self
            .transactions
            .find_one(doc! {"idempotency_key": idem})
            .await
            .map_err(db_err)?;
        doc.as_ref().map(|d| Self::txn_from_doc(d, idem)).transpose()
    }

    async fn set_transaction_status(&self, idem: &str, status: TransactionStatus) -> Result<(), AppError> {
        self.transactions
            .update_one(
                doc! {"idempotency_key": idem},
                doc! {"$set": {"status": status.as_wire_str()}},
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn idem_insert_hold(&self, hold: HoldRecord) -> Result<(), AppError> {
        let existing = self
            .holds
            .find_one(doc! {"idempotency_key": &hold.idempotency_key})
            .await
            .map_err(db_err)?;
        if existing.is_some() {
            return Ok(());
        }
        let document = doc! {
            "idempotency_key": &hold.idempotency_key,
            "account_id": hold.account_id as i64,
            "amount": to_decimal128(hold.amount)?,
            "status": hold.status.code().to_string(),
        };
        match self.holds.insert_one(document).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("E11000") => Ok(()),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find_hold(&self, idem: &str) -> Result<Option<HoldRecord>, AppError> {
        let Some(doc) = self.holds.find_one(doc! {"idempotency_key": idem}).await.map_err(db_err)? else {
            return Ok(None);
        };
        let status_code = doc
            .get_str("status")
            .map_err(|_| AppError::ProtocolError("hold missing status".into()))?
            .parse::<i16>()
            .map_err(|_| AppError::ProtocolError("hold status not numeric".into()))?;
        let status = match status_code {
            1 => HoldStatus::Active,
            2 => HoldStatus::Captured,
            _ => HoldStatus::Released,
        };
        Ok(Some(HoldRecord {
            idempotency_key: idem.to_string(),
            account_id: doc.get_i64("account_id").unwrap_or_default() as u32,
            amount: from_decimal128(
                doc.get("amount")
                    .and_then(Bson::as_decimal128)
                    .ok_or_else(|| AppError::ProtocolError("hold missing amount".into()))?,
            )?,
            status,
        }))
    }

    async fn set_hold_status(&self, idem: &str, status: HoldStatus) -> Result<(), AppError> {
        self.holds
            .update_one(
                doc! {"idempotency_key": idem},
                doc! {"$set": {"status": status.code().to_string()}},
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn find_ledger_entry(&self, txn_id: &str, account_id: u32) -> Result<Option<LedgerEntry>, AppError> {
        let Some(doc) = self
            .ledger
            .find_one(doc! {"txn_id": txn_id, "account_id": account_id as i64})
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        Ok(Some(LedgerEntry {
            txn_id: txn_id.to_string(),
            account_id,
            amount: from_decimal128(
                doc.get("amount")
                    .and_then(Bson::as_decimal128)
                    .ok_or_else(|| AppError::ProtocolError("ledger entry missing amount".into()))?,
            )?,
        }))
    }

    async fn idem_insert_ledger_entry(&self, entry: LedgerEntry) -> Result<(), AppError> {
        let sign = entry.sign();
        let document = doc! {
            "txn_id": &entry.txn_id,
            "account_id": entry.account_id as i64,
            "amount": to_decimal128(entry.amount)?,
            "amount_sign": sign as i32,
        };
        match self.ledger.insert_one(document).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("E11000") => Ok(()),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn reset(&self, seed_balance: Decimal, account_range: u32) -> Result<(), AppError> {
        self.transactions.delete_many(doc! {}).await.map_err(db_err)?;
        self.holds.delete_many(doc! {}).await.map_err(db_err)?;
        self.ledger.delete_many(doc! {}).await.map_err(db_err)?;

        for index in 1..=account_range {
            let account_id = crate::engine_id::EngineId::Doc.account_id(index);
            let account = Account {
                account_id,
                balance: seed_balance,
                hold_amount: Decimal::ZERO,
            };
            self.accounts
                .replace_one(doc! {"_id": account_id as i64}, Self::account_doc(&account)?)
                .with_options(ReplaceOptions::builder().upsert(true).build())
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal128_round_trips_through_string() {
        let original = Decimal::new(123_456, 2);
        let encoded = to_decimal128(original).unwrap();
        let decoded = from_decimal128(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    /// Conformance test named in §9 open issue 2: pins down that the
    /// driver's Decimal128 round-trips a typical monetary value exactly,
    /// rather than assuming it.
    #[tokio::test]
    #[ignore = "requires a running document-store instance"]
    async fn live_driver_preserves_decimal_precision() {
        let uri = std::env::var("DOCSTORE_URL").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let client = mongodb::Client::with_uri_str(&uri).await.unwrap();
        let db = client.database("heteroledger_test");
        let store = MongoDocStore::new(&db);
        store.ensure_indexes().await.unwrap();
        store
            .credit_balance(900_001, Decimal::new(1, 2))
            .await
            .unwrap();
        let acct = store.get_account(900_001).await.unwrap().unwrap();
        assert_eq!(acct.balance, Decimal::new(1, 2));
    }
}
