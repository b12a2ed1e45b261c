// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! SQLite account store.
//!
//! Every server process opens its own `SqliteStore` on the same database
//! file. Cross-process safety comes from the conditional
//! `UPDATE ... WHERE revision = ?` in [`compare_and_set_balance`], which SQLite
//! executes atomically; writers that lose the race see zero rows updated.
//!
//! [`compare_and_set_balance`]: AccountStore::compare_and_set_balance

use super::AccountStore;
use crate::account::Account;
use crate::base::{AccountId, Revision};
use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::pool::{Pool, Pooled};
use crate::transaction::{Transaction, TransactionOutcome};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS economy_accounts (
        id TEXT NOT NULL PRIMARY KEY,
        name TEXT,
        balance INTEGER NOT NULL,
        revision INTEGER NOT NULL,
        frozen INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_economy_accounts_name ON economy_accounts(name);
    CREATE TABLE IF NOT EXISTS economy_transactions (
        id TEXT NOT NULL PRIMARY KEY,
        timestamp TEXT NOT NULL,
        kind TEXT NOT NULL,
        source TEXT,
        destination TEXT,
        amount INTEGER NOT NULL,
        actor TEXT NOT NULL,
        outcome TEXT NOT NULL,
        reason TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_economy_transactions_timestamp
        ON economy_transactions(timestamp);
";

const SELECT_BY_ID: &str =
    "SELECT id, name, balance, revision, frozen FROM economy_accounts WHERE id = ?1";
const SELECT_BY_NAME: &str =
    "SELECT id, name, balance, revision, frozen FROM economy_accounts WHERE name = ?1 LIMIT 1";
const SELECT_ALL: &str =
    "SELECT id, name, balance, revision, frozen FROM economy_accounts ORDER BY id";
const SELECT_TOP: &str = "SELECT id, name, balance, revision, frozen FROM economy_accounts
     WHERE balance != 0 ORDER BY balance DESC, name ASC LIMIT ?1";
const INSERT_ACCOUNT: &str = "INSERT INTO economy_accounts
     (id, name, balance, revision, frozen, created_at, updated_at)
     VALUES (?1, NULL, ?2, ?3, 0, ?4, ?4)
     ON CONFLICT(id) DO NOTHING";
const CAS_BALANCE: &str = "UPDATE economy_accounts
     SET balance = ?1, revision = revision + 1, updated_at = ?2
     WHERE id = ?3 AND revision = ?4
     RETURNING id, name, balance, revision, frozen";
const SET_FROZEN: &str = "UPDATE economy_accounts
     SET frozen = ?1, revision = revision + 1, updated_at = ?2
     WHERE id = ?3
     RETURNING id, name, balance, revision, frozen";
const SET_NAME: &str = "UPDATE economy_accounts
     SET name = ?1, updated_at = ?2
     WHERE id = ?3
     RETURNING id, name, balance, revision, frozen";
const SELECT_REVISION: &str = "SELECT revision FROM economy_accounts WHERE id = ?1";
const INSERT_TRANSACTION: &str = "INSERT OR IGNORE INTO economy_transactions
     (id, timestamp, kind, source, destination, amount, actor, outcome, reason)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";
const PURGE_TRANSACTIONS: &str = "DELETE FROM economy_transactions WHERE timestamp < ?1";

pub struct SqliteStore {
    pool: Pool<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `config.path` and applies
    /// the schema.
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        let path = config.path.clone();
        let busy_timeout = config.busy_timeout();
        let pool = Pool::new(config.pool_size, config.checkout_timeout(), move || {
            let conn = Connection::open(&path).map_err(|e| e.to_string())?;
            conn.busy_timeout(busy_timeout).map_err(|e| e.to_string())?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| e.to_string())?;
            Ok(conn)
        });

        let store = Self { pool };
        store
            .conn()?
            .execute_batch(SCHEMA)
            .map_err(unavailable)?;
        info!(path = %config.path.display(), "account store ready");
        Ok(store)
    }

    fn conn(&self) -> Result<Pooled<'_, Connection>, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn update_returning(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Account, StoreError> {
        self.conn()?
            .query_row(sql, params, account_from_row)
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound)
    }

    fn query_accounts(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql).map_err(unavailable)?;
        let rows = stmt
            .query_map(params, account_from_row)
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }
}

impl AccountStore for SqliteStore {
    fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        self.conn()?
            .query_row(SELECT_BY_ID, params![id.to_string()], account_from_row)
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound)
    }

    fn create_if_absent(&self, id: AccountId, default_balance: i64) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                INSERT_ACCOUNT,
                params![
                    id.to_string(),
                    default_balance,
                    Revision::INITIAL.0 as i64,
                    timestamp(Utc::now())
                ],
            )
            .map_err(unavailable)?;
        if inserted == 1 {
            debug!(account = %id, balance = default_balance, "created account");
        }

        conn.query_row(SELECT_BY_ID, params![id.to_string()], account_from_row)
            .map_err(unavailable)
    }

    fn compare_and_set_balance(
        &self,
        id: AccountId,
        expected: Revision,
        new_balance: i64,
    ) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        let updated = conn
            .query_row(
                CAS_BALANCE,
                params![
                    new_balance,
                    timestamp(Utc::now()),
                    id.to_string(),
                    expected.0 as i64
                ],
                account_from_row,
            )
            .optional()
            .map_err(unavailable)?;
        if let Some(account) = updated {
            return Ok(account);
        }

        let actual: Option<i64> = conn
            .query_row(SELECT_REVISION, params![id.to_string()], |row| row.get(0))
            .optional()
            .map_err(unavailable)?;
        match actual {
            Some(actual) => Err(StoreError::Conflict {
                expected,
                actual: Revision(actual as u64),
            }),
            None => Err(StoreError::NotFound),
        }
    }

    fn set_frozen(&self, id: AccountId, frozen: bool) -> Result<Account, StoreError> {
        self.update_returning(
            SET_FROZEN,
            params![frozen, timestamp(Utc::now()), id.to_string()],
        )
    }

    fn rename(&self, id: AccountId, name: &str) -> Result<Account, StoreError> {
        self.update_returning(
            SET_NAME,
            params![name, timestamp(Utc::now()), id.to_string()],
        )
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Account>, StoreError> {
        self.conn()?
            .query_row(SELECT_BY_NAME, params![name], account_from_row)
            .optional()
            .map_err(unavailable)
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.query_accounts(SELECT_ALL, [])
    }

    fn top_balances(&self, limit: usize) -> Result<Vec<Account>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_accounts(SELECT_TOP, params![limit])
    }

    fn append_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        if transactions.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(unavailable)?;
        {
            let mut stmt = tx.prepare_cached(INSERT_TRANSACTION).map_err(unavailable)?;
            for transaction in transactions {
                let (outcome, reason) = match &transaction.outcome {
                    TransactionOutcome::Committed => ("committed", None),
                    TransactionOutcome::Rejected(reason) => ("rejected", Some(reason.as_str())),
                };
                stmt.execute(params![
                    transaction.id.to_string(),
                    timestamp(transaction.timestamp),
                    transaction.kind.as_str(),
                    transaction.source.map(|id| id.to_string()),
                    transaction.destination.map(|id| id.to_string()),
                    i64::try_from(transaction.amount).unwrap_or(i64::MAX),
                    transaction.actor.to_string(),
                    outcome,
                    reason,
                ])
                .map_err(unavailable)?;
            }
        }
        tx.commit().map_err(unavailable)
    }

    fn purge_transactions(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.conn()?
            .execute(PURGE_TRANSACTIONS, params![timestamp(before)])
            .map_err(unavailable)
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let revision: i64 = row.get(3)?;
    Ok(Account {
        id: AccountId(id),
        name: row.get(1)?,
        balance: row.get(2)?,
        revision: Revision(revision as u64),
        frozen: row.get(4)?,
    })
}
