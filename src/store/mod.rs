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

//! Durable account storage.
//!
//! The store is the single source of truth. Its one concurrency primitive is
//! [`AccountStore::compare_and_set_balance`], a single-row conditional update
//! keyed on the account's [`Revision`]. Writers on different processes race
//! through it; the loser gets [`StoreError::Conflict`] and nothing changes.

pub mod memory;
pub mod sqlite;

use crate::account::Account;
use crate::base::{AccountId, Revision};
use crate::error::StoreError;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Persistence contract the ledger engine is written against.
///
/// Implementations must report transient failures as
/// [`StoreError::Unavailable`], never as [`StoreError::NotFound`].
pub trait AccountStore: Send + Sync {
    fn get(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Returns the existing row, or inserts one with `default_balance`.
    ///
    /// Concurrent callers for the same new identity observe exactly one
    /// created row; uniqueness is enforced by the store itself.
    fn create_if_absent(&self, id: AccountId, default_balance: i64) -> Result<Account, StoreError>;

    /// Writes `new_balance` only if the stored revision equals `expected`,
    /// bumping the revision by one. Returns the updated row.
    fn compare_and_set_balance(
        &self,
        id: AccountId,
        expected: Revision,
        new_balance: i64,
    ) -> Result<Account, StoreError>;

    /// Sets the frozen flag. Bumps the revision so in-flight writers reload.
    fn set_frozen(&self, id: AccountId, frozen: bool) -> Result<Account, StoreError>;

    /// Updates the display name. Balance and revision are untouched.
    fn rename(&self, id: AccountId, name: &str) -> Result<Account, StoreError>;

    fn find_by_name(&self, name: &str) -> Result<Option<Account>, StoreError>;

    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Accounts with a non-zero balance, richest first, ties broken by name.
    fn top_balances(&self, limit: usize) -> Result<Vec<Account>, StoreError>;

    /// Appends journal records. Records whose ID is already stored are skipped.
    fn append_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError>;

    /// Deletes journal records older than `before`. Returns how many went.
    fn purge_transactions(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Orders accounts the way [`AccountStore::top_balances`] promises.
pub(crate) fn rank_top(mut accounts: Vec<Account>, limit: usize) -> Vec<Account> {
    accounts.retain(|account| account.balance != 0);
    accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.name.cmp(&b.name)));
    accounts.truncate(limit);
    accounts
}
