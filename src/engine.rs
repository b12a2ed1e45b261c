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

//! Ledger engine.
//!
//! The [`Engine`] is the only component that writes balances. It composes an
//! [`AccountStore`] (authoritative) with a [`BalanceCache`] (best-effort,
//! shared across nodes).
//!
//! # Read path
//!
//! [`Engine::get_balance`] answers from the cache when it can. On a miss it
//! loads the row from the store, creating it on first touch, and populates the
//! cache. Cache failures are logged and the read falls back to the store.
//!
//! # Write path
//!
//! Every mutation runs inside the account's critical section:
//!
//! 1. Read the authoritative row from the store (never the cache).
//! 2. Apply the frozen and non-negativity rules.
//! 3. Compare-and-set the new balance against the revision read in step 1.
//!    A conflict means another node committed in between; reload and retry,
//!    up to `max_retries` extra times, then fail with
//!    [`LedgerError::Contention`].
//! 4. Invalidate the cache entry. The new balance is never written to the
//!    cache here; the next reader repopulates it from the store.
//!
//! # Thread Safety
//!
//! The engine is `Send + Sync` and meant to be shared behind an `Arc`.
//! Several engines may share one store and one cache; they then behave like
//! separate server processes.

use crate::account::{Account, BalanceChange, MutationPolicy, amount_to_delta};
use crate::base::AccountId;
use crate::cache::{BalanceCache, CacheEntry};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, StoreError};
use crate::locks::AccountLocks;
use crate::store::AccountStore;
use crate::transaction::{Actor, Transaction};
use crate::transaction_queue::TransactionQueue;
use std::sync::Arc;
use tracing::{debug, warn};

/// Journal records written per store call when flushing.
const JOURNAL_BATCH: usize = 256;

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Commit {
    pub(crate) previous: i64,
    pub(crate) account: Account,
}

/// Balance ledger over a shared store and cache.
pub struct Engine {
    config: LedgerConfig,
    store: Arc<dyn AccountStore>,
    cache: Arc<dyn BalanceCache>,
    pub(crate) locks: AccountLocks,
    journal: TransactionQueue,
}

impl Engine {
    pub fn new(
        config: LedgerConfig,
        store: Arc<dyn AccountStore>,
        cache: Arc<dyn BalanceCache>,
    ) -> Self {
        Engine {
            config,
            store,
            cache,
            locks: AccountLocks::new(),
            journal: TransactionQueue::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Current balance in minor units, creating the account on first touch.
    pub fn get_balance(&self, id: AccountId) -> Result<i64, LedgerError> {
        match self.cache.get(id) {
            Ok(Some(entry)) => return Ok(entry.balance),
            Ok(None) => {}
            Err(err) => warn!(account = %id, error = %err, "cache read failed, using store"),
        }

        // Populate under the lock so a local writer cannot invalidate between
        // our store read and our cache put.
        let _guard = self.locks.lock(id);
        let account = self.load(id)?;
        self.populate(&account);
        Ok(account.balance)
    }

    /// Authoritative snapshot from the store, creating the account on first touch.
    pub fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.load(id)
    }

    /// Whether the account exists. Never creates it.
    pub fn has_account(&self, id: AccountId) -> Result<bool, LedgerError> {
        match self.cache.get(id) {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => {}
            Err(err) => warn!(account = %id, error = %err, "cache read failed, using store"),
        }
        match self.store.get(id) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(store_failure(err)),
        }
    }

    pub fn deposit(&self, id: AccountId, amount: u64) -> Result<Account, LedgerError> {
        self.credit(id, amount, MutationPolicy::default(), Actor::System)
    }

    pub fn withdraw(&self, id: AccountId, amount: u64) -> Result<Account, LedgerError> {
        self.debit(id, amount, MutationPolicy::default(), Actor::System)
    }

    /// Deposit attributed to a named caller, such as a plugin paying out.
    pub fn deposit_as(&self, id: AccountId, amount: u64, actor: Actor) -> Result<Account, LedgerError> {
        self.credit(id, amount, MutationPolicy::default(), actor)
    }

    /// Withdrawal attributed to a named caller.
    pub fn withdraw_as(&self, id: AccountId, amount: u64, actor: Actor) -> Result<Account, LedgerError> {
        self.debit(id, amount, MutationPolicy::default(), actor)
    }

    /// Administrative grant.
    pub fn admin_deposit(&self, id: AccountId, amount: u64, admin: &str) -> Result<Account, LedgerError> {
        self.credit(id, amount, MutationPolicy::default(), Actor::Admin(admin.to_string()))
    }

    /// Administrative removal. May overdraw when `allow_admin_negative` is set.
    pub fn admin_withdraw(&self, id: AccountId, amount: u64, admin: &str) -> Result<Account, LedgerError> {
        let policy = MutationPolicy::allow_negative(self.config.allow_admin_negative);
        self.debit(id, amount, policy, Actor::Admin(admin.to_string()))
    }

    /// Administrative overwrite of the balance. Journaled as the difference.
    pub fn set_balance(&self, id: AccountId, balance: i64, admin: &str) -> Result<Account, LedgerError> {
        let policy = MutationPolicy::allow_negative(self.config.allow_admin_negative);
        let actor = Actor::Admin(admin.to_string());
        let (result, previous) = {
            let _guard = self.locks.lock(id);
            let result = self.mutate_locked(id, BalanceChange::Set(balance), policy);
            // A refused set left the row alone, so its balance is the one the
            // set was measured against.
            let previous = match &result {
                Ok(commit) => Some(commit.previous),
                Err(_) => self.store.get(id).ok().map(|account| account.balance),
            };
            (result, previous)
        };

        let adjustment = previous
            .and_then(|previous| balance.checked_sub(previous))
            .and_then(|delta| Transaction::adjustment(id, delta, actor.clone()));
        match &result {
            Ok(_) => {
                if let Some(transaction) = adjustment {
                    self.record(transaction);
                }
            }
            Err(err) => {
                let transaction = adjustment.unwrap_or_else(|| Transaction::set(id, balance, actor));
                self.record(transaction.rejected(err));
            }
        }
        result.map(|commit| commit.account)
    }

    /// Applies a signed change to one account.
    ///
    /// A negative `delta` that would end below zero fails with
    /// [`LedgerError::InsufficientFunds`] unless `allow_negative` is set.
    pub fn mutate(&self, id: AccountId, delta: i64, allow_negative: bool) -> Result<Account, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let amount = delta.unsigned_abs();
        let policy = MutationPolicy::allow_negative(allow_negative);
        if delta > 0 {
            self.credit(id, amount, policy, Actor::System)
        } else {
            self.debit(id, amount, policy, Actor::System)
        }
    }

    pub fn freeze(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.set_frozen(id, true)
    }

    pub fn unfreeze(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.set_frozen(id, false)
    }

    pub fn rename(&self, id: AccountId, name: &str) -> Result<Account, LedgerError> {
        let _guard = self.locks.lock(id);
        self.load(id)?;
        self.store.rename(id, name).map_err(store_failure)
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Account>, LedgerError> {
        self.store.find_by_name(name).map_err(store_failure)
    }

    /// Richest accounts with a non-zero balance.
    pub fn top_accounts(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
        self.store.top_balances(limit).map_err(store_failure)
    }

    pub fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.store.accounts().map_err(store_failure)
    }

    /// Number of journal records waiting to be flushed.
    pub fn pending_journal(&self) -> usize {
        self.journal.len()
    }

    /// Writes buffered journal records to the store.
    ///
    /// Everything pending is taken off the queue up front. On failure the
    /// unwritten records go back ahead of anything queued since, in their
    /// original order, and the error is returned.
    pub fn flush_journal(&self) -> Result<usize, LedgerError> {
        let pending = self.journal.drain(usize::MAX);
        let mut written = 0;
        for batch in pending.chunks(JOURNAL_BATCH) {
            if let Err(err) = self.store.append_transactions(batch) {
                let unwritten = pending[written..].to_vec();
                warn!(pending = unwritten.len(), error = %err, "journal flush failed");
                self.journal.requeue_front(unwritten);
                return Err(store_failure(err));
            }
            written += batch.len();
        }
        Ok(written)
    }

    /// Deletes journal records older than `older_than`.
    pub fn purge_journal(&self, older_than: chrono::Duration) -> Result<usize, LedgerError> {
        let cutoff = chrono::Utc::now() - older_than;
        self.store.purge_transactions(cutoff).map_err(store_failure)
    }

    fn credit(
        &self,
        id: AccountId,
        amount: u64,
        policy: MutationPolicy,
        actor: Actor,
    ) -> Result<Account, LedgerError> {
        let transaction = Transaction::deposit(id, amount, actor);
        let result = amount_to_delta(amount).and_then(|delta| {
            let _guard = self.locks.lock(id);
            self.mutate_locked(id, BalanceChange::Delta(delta), policy)
        });
        self.finish(transaction, result)
    }

    fn debit(
        &self,
        id: AccountId,
        amount: u64,
        policy: MutationPolicy,
        actor: Actor,
    ) -> Result<Account, LedgerError> {
        let transaction = Transaction::withdraw(id, amount, actor);
        let result = amount_to_delta(amount).and_then(|delta| {
            let _guard = self.locks.lock(id);
            self.mutate_locked(id, BalanceChange::Delta(-delta), policy)
        });
        self.finish(transaction, result)
    }

    fn finish(
        &self,
        transaction: Transaction,
        result: Result<Commit, LedgerError>,
    ) -> Result<Account, LedgerError> {
        match result {
            Ok(commit) => {
                self.record(transaction);
                Ok(commit.account)
            }
            Err(err) => {
                self.record(transaction.rejected(&err));
                Err(err)
            }
        }
    }

    /// Read-check-CAS-invalidate loop. The caller holds the account's lock.
    pub(crate) fn mutate_locked(
        &self,
        id: AccountId,
        change: BalanceChange,
        policy: MutationPolicy,
    ) -> Result<Commit, LedgerError> {
        let attempts = self.config.max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let current = self.load(id)?;
            let next = current.apply(change, policy)?;
            if next == current.balance {
                return Ok(Commit {
                    previous: current.balance,
                    account: current,
                });
            }

            match self.store.compare_and_set_balance(id, current.revision, next) {
                Ok(account) => {
                    debug!(
                        account = %id,
                        balance = account.balance,
                        revision = %account.revision,
                        "committed"
                    );
                    self.invalidate(id);
                    return Ok(Commit {
                        previous: current.balance,
                        account,
                    });
                }
                Err(StoreError::Conflict { expected, actual }) => {
                    debug!(account = %id, %expected, %actual, attempt, "revision conflict, retrying");
                }
                Err(err) => return Err(store_failure(err)),
            }
        }

        warn!(account = %id, attempts, "giving up after repeated conflicts");
        Err(LedgerError::Contention { attempts })
    }

    fn set_frozen(&self, id: AccountId, frozen: bool) -> Result<Account, LedgerError> {
        let _guard = self.locks.lock(id);
        self.load(id)?;
        let account = self.store.set_frozen(id, frozen).map_err(store_failure)?;
        self.invalidate(id);
        debug!(account = %id, frozen, "frozen flag updated");
        Ok(account)
    }

    /// Reads the row, creating it with the default balance if missing.
    fn load(&self, id: AccountId) -> Result<Account, LedgerError> {
        match self.store.get(id) {
            Ok(account) => Ok(account),
            Err(StoreError::NotFound) => self
                .store
                .create_if_absent(id, self.config.default_balance)
                .map_err(store_failure),
            Err(err) => Err(store_failure(err)),
        }
    }

    fn populate(&self, account: &Account) {
        let entry = CacheEntry::from(account);
        if let Err(err) = self.cache.put(account.id, entry, self.config.cache_ttl()) {
            warn!(account = %account.id, error = %err, "cache populate failed");
        }
    }

    fn invalidate(&self, id: AccountId) {
        // A failed invalidation leaves a stale entry until its TTL runs out.
        if let Err(err) = self.cache.invalidate(id) {
            warn!(account = %id, error = %err, "cache invalidation failed");
        }
    }

    pub(crate) fn record(&self, transaction: Transaction) {
        if self.config.journal {
            self.journal.push(transaction);
        }
    }
}

/// Maps store failures onto the ledger taxonomy.
///
/// Accounts are never deleted, so a missing row after `load` means the store
/// is not behaving and is reported as unavailable.
pub(crate) fn store_failure(err: StoreError) -> LedgerError {
    match err {
        StoreError::Unavailable(reason) => LedgerError::StoreUnavailable(reason),
        other => LedgerError::StoreUnavailable(other.to_string()),
    }
}
