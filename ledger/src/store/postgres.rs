//! Postgres store.
//!
//! Each [`CommitBatch`] runs inside one database transaction. Account rows
//! are only updated `WHERE version = expected`, so a writer in another
//! process that got there first makes the whole batch roll back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{error, info};
use uuid::Uuid;

use bakripay_common::{
    AccountId, AccountStatus, IdempotencyKey, LedgerError, Result, TransactionId,
    TransactionStatus, UserId,
};

use super::{CommitBatch, LedgerStore};
use crate::account::Account;
use crate::transaction::{Transaction, TransactionType};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS ledger_accounts (
        id              TEXT PRIMARY KEY,
        user_id         TEXT NOT NULL,
        account_number  TEXT NOT NULL UNIQUE,
        balance         NUMERIC(28, 2) NOT NULL CHECK (balance >= 0),
        status          TEXT NOT NULL,
        version         BIGINT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS ledger_accounts_user_idx
        ON ledger_accounts (user_id, created_at)"#,
    r#"CREATE TABLE IF NOT EXISTS ledger_transactions (
        seq                 BIGSERIAL UNIQUE,
        id                  UUID PRIMARY KEY,
        kind                TEXT NOT NULL,
        source_account      TEXT,
        destination_account TEXT,
        amount              NUMERIC(28, 2) NOT NULL CHECK (amount > 0),
        status              TEXT NOT NULL,
        reference           TEXT,
        idempotency_key     TEXT UNIQUE,
        reverses            UUID,
        reversed_by         UUID,
        failure             TEXT,
        entries             TEXT NOT NULL,
        created_at          TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS ledger_transactions_source_idx
        ON ledger_transactions (source_account, seq)"#,
    r#"CREATE INDEX IF NOT EXISTS ledger_transactions_destination_idx
        ON ledger_transactions (destination_account, seq)"#,
];

const ACCOUNT_COLUMNS: &str =
    "id, user_id, account_number, balance, status, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, kind, source_account, destination_account, amount, \
     status, reference, idempotency_key, reverses, reversed_by, failure, entries, created_at";

/// Store backed by a Postgres connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with at most `max_connections` connections.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage)?;
        info!(max_connections, "Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }
}

fn storage(err: sqlx::Error) -> LedgerError {
    error!(error = %err, "Postgres operation failed");
    LedgerError::StorageFailure(err.to_string())
}

fn corrupt(what: &str, value: &str) -> LedgerError {
    LedgerError::StorageFailure(format!("unreadable {what} '{value}' in database"))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let status: String = row.try_get("status").map_err(storage)?;
    let version: i64 = row.try_get("version").map_err(storage)?;
    Ok(Account {
        id: AccountId::new(row.try_get::<String, _>("id").map_err(storage)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(storage)?),
        account_number: row.try_get("account_number").map_err(storage)?,
        balance: row.try_get::<Decimal, _>("balance").map_err(storage)?,
        status: AccountStatus::parse(&status).ok_or_else(|| corrupt("account status", &status))?,
        version: version as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(storage)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let kind: String = row.try_get("kind").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;
    let failure: Option<String> = row.try_get("failure").map_err(storage)?;
    let entries: String = row.try_get("entries").map_err(storage)?;

    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id").map_err(storage)?),
        kind: TransactionType::parse(&kind).ok_or_else(|| corrupt("transaction kind", &kind))?,
        source: row
            .try_get::<Option<String>, _>("source_account")
            .map_err(storage)?
            .map(AccountId::new),
        destination: row
            .try_get::<Option<String>, _>("destination_account")
            .map_err(storage)?
            .map(AccountId::new),
        amount: row.try_get::<Decimal, _>("amount").map_err(storage)?,
        status: TransactionStatus::parse(&status)
            .ok_or_else(|| corrupt("transaction status", &status))?,
        reference: row.try_get("reference").map_err(storage)?,
        idempotency_key: row
            .try_get::<Option<String>, _>("idempotency_key")
            .map_err(storage)?
            .map(IdempotencyKey::new),
        reverses: row
            .try_get::<Option<Uuid>, _>("reverses")
            .map_err(storage)?
            .map(TransactionId::from_uuid),
        reversed_by: row
            .try_get::<Option<Uuid>, _>("reversed_by")
            .map_err(storage)?
            .map(TransactionId::from_uuid),
        failure: failure
            .map(|raw| serde_json::from_str(&raw).map_err(|_| corrupt("failure", &raw)))
            .transpose()?,
        entries: serde_json::from_str(&entries).map_err(|_| corrupt("entries", &entries))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage)?,
    })
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LedgerError::StorageFailure(e.to_string()))
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO ledger_accounts ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(account.id.as_str())
        .bind(account.user_id.as_str())
        .bind(&account.account_number)
        .bind(account.balance)
        .bind(account.status.as_str())
        .bind(account.version as i64)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts_for_user(&self, user_id: &UserId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts"))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn load_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions WHERE idempotency_key = $1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transactions_for_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions \
             WHERE source_account = $1 OR destination_account = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(account_id.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn commit(&self, batch: CommitBatch) -> Result<()> {
        // Dropping `tx` on any early return rolls the whole batch back.
        let mut tx = self.pool.begin().await.map_err(storage)?;

        for write in &batch.account_writes {
            let account = &write.account;
            let result = sqlx::query(
                "UPDATE ledger_accounts \
                 SET balance = $1, status = $2, version = $3, updated_at = $4 \
                 WHERE id = $5 AND version = $6",
            )
            .bind(account.balance)
            .bind(account.status.as_str())
            .bind(account.version as i64)
            .bind(account.updated_at)
            .bind(account.id.as_str())
            .bind(write.expected_version as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            if result.rows_affected() != 1 {
                return Err(LedgerError::StorageFailure(format!(
                    "version conflict on account {}",
                    account.id
                )));
            }
        }

        for record in &batch.inserts {
            let failure = record.failure.as_ref().map(encode_json).transpose()?;
            let entries = encode_json(&record.entries)?;
            sqlx::query(&format!(
                "INSERT INTO ledger_transactions ({TRANSACTION_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
            ))
            .bind(*record.id.as_uuid())
            .bind(record.kind.as_str())
            .bind(record.source.as_ref().map(|a| a.as_str().to_string()))
            .bind(record.destination.as_ref().map(|a| a.as_str().to_string()))
            .bind(record.amount)
            .bind(record.status.as_str())
            .bind(record.reference.clone())
            .bind(record.idempotency_key.as_ref().map(|k| k.as_str().to_string()))
            .bind(record.reverses.map(|id| *id.as_uuid()))
            .bind(record.reversed_by.map(|id| *id.as_uuid()))
            .bind(failure)
            .bind(entries)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        for update in &batch.status_updates {
            if !update.from.can_transition_to(update.to) {
                return Err(LedgerError::StorageFailure(format!(
                    "invalid status change {} -> {} for {}",
                    update.from, update.to, update.transaction_id
                )));
            }
            let result = sqlx::query(
                "UPDATE ledger_transactions \
                 SET status = $1, reversed_by = COALESCE($2, reversed_by) \
                 WHERE id = $3 AND status = $4",
            )
            .bind(update.to.as_str())
            .bind(update.reversed_by.map(|id| *id.as_uuid()))
            .bind(*update.transaction_id.as_uuid())
            .bind(update.from.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            if result.rows_affected() != 1 {
                return Err(LedgerError::StorageFailure(format!(
                    "transaction {} is no longer {}",
                    update.transaction_id, update.from
                )));
            }
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }
}
