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

//! In-process account store.
//!
//! Backs single-node deployments and tests. Several engines sharing one
//! `Arc<InMemoryStore>` behave like several server processes sharing one
//! database: their only common ground is the compare-and-set.
//!
//! The store can be told to misbehave (go offline, fail specific writes,
//! report phantom conflicts) so outage and contention paths can be exercised.

use super::{AccountStore, rank_top};
use crate::account::Account;
use crate::base::{AccountId, Revision};
use crate::error::StoreError;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    /// Count of balance writes attempted so far.
    writes: u64,
    /// 1-based write numbers that fail as unavailable.
    failing_writes: HashSet<u64>,
    /// Phantom conflicts still to report, per account.
    conflicts: HashMap<AccountId, u32>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    accounts: DashMap<AccountId, Account>,
    journal: Mutex<Vec<Transaction>>,
    faults: Mutex<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Fails the given balance writes, counted from 1 over the store's lifetime.
    pub fn fail_writes(&self, writes: impl IntoIterator<Item = u64>) {
        self.faults.lock().failing_writes.extend(writes);
    }

    /// Number of balance writes attempted so far.
    pub fn write_count(&self) -> u64 {
        self.faults.lock().writes
    }

    /// Reports `count` conflicts for `id` as if another node kept winning.
    pub fn inject_conflicts(&self, id: AccountId, count: u32) {
        self.faults.lock().conflicts.insert(id, count);
    }

    /// Journal records appended so far.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.journal.lock().clone()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.faults.lock().offline {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn update<F>(&self, id: AccountId, f: F) -> Result<Account, StoreError>
    where
        F: FnOnce(&mut Account),
    {
        self.check_online()?;
        let mut entry = self.accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }
}

impl AccountStore for InMemoryStore {
    fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        self.check_online()?;
        self.accounts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    fn create_if_absent(&self, id: AccountId, default_balance: i64) -> Result<Account, StoreError> {
        self.check_online()?;
        let entry = self
            .accounts
            .entry(id)
            .or_insert_with(|| Account::new(id, default_balance));
        Ok(entry.value().clone())
    }

    fn compare_and_set_balance(
        &self,
        id: AccountId,
        expected: Revision,
        new_balance: i64,
    ) -> Result<Account, StoreError> {
        {
            let mut faults = self.faults.lock();
            if faults.offline {
                return Err(StoreError::Unavailable("store offline".into()));
            }
            faults.writes += 1;
            let write = faults.writes;
            if faults.failing_writes.remove(&write) {
                return Err(StoreError::Unavailable(format!("write {write} failed")));
            }
            if let Some(remaining) = faults.conflicts.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Conflict {
                        expected,
                        actual: expected.next(),
                    });
                }
            }
        }

        let mut entry = self.accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        let account = entry.value_mut();
        if account.revision != expected {
            return Err(StoreError::Conflict {
                expected,
                actual: account.revision,
            });
        }
        account.balance = new_balance;
        account.revision = account.revision.next();
        Ok(account.clone())
    }

    fn set_frozen(&self, id: AccountId, frozen: bool) -> Result<Account, StoreError> {
        self.update(id, |account| {
            account.frozen = frozen;
            account.revision = account.revision.next();
        })
    }

    fn rename(&self, id: AccountId, name: &str) -> Result<Account, StoreError> {
        self.update(id, |account| account.name = Some(name.to_string()))
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Account>, StoreError> {
        self.check_online()?;
        Ok(self
            .accounts
            .iter()
            .find(|entry| entry.name.as_deref() == Some(name))
            .map(|entry| entry.value().clone()))
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.check_online()?;
        let mut accounts: Vec<Account> =
            self.accounts.iter().map(|entry| entry.value().clone()).collect();
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }

    fn top_balances(&self, limit: usize) -> Result<Vec<Account>, StoreError> {
        Ok(rank_top(self.accounts()?, limit))
    }

    fn append_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        self.check_online()?;
        let mut journal = self.journal.lock();
        for transaction in transactions {
            if !journal.iter().any(|existing| existing.id == transaction.id) {
                journal.push(transaction.clone());
            }
        }
        Ok(())
    }

    fn purge_transactions(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut journal = self.journal.lock();
        let len = journal.len();
        journal.retain(|transaction| transaction.timestamp >= before);
        Ok(len - journal.len())
    }
}
