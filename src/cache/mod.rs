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

//! Shared balance cache.
//!
//! The cache fronts the store for reads and is shared by every node. It is
//! never authoritative: the engine invalidates an entry after each committed
//! write and never writes a freshly committed balance into it, so the next
//! reader on any node repopulates from the store. Entries carry a TTL, which
//! bounds how long a stale value written by a crashed or racing node can live.

pub mod memory;
pub mod redis;

use crate::account::Account;
use crate::base::{AccountId, Revision};
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use self::memory::SharedMemoryCache;
pub use self::redis::RedisCache;

/// Balance snapshot copied from an account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub balance: i64,
    pub revision: Revision,
}

impl From<&Account> for CacheEntry {
    fn from(account: &Account) -> Self {
        Self {
            balance: account.balance,
            revision: account.revision,
        }
    }
}

/// Cache contract the ledger engine is written against.
pub trait BalanceCache: Send + Sync {
    /// Returns the entry if present and not expired.
    fn get(&self, id: AccountId) -> Result<Option<CacheEntry>, CacheError>;

    fn put(&self, id: AccountId, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError>;

    /// Removes the entry for every node sharing the cache.
    fn invalidate(&self, id: AccountId) -> Result<(), CacheError>;
}

/// A cache that holds nothing. Every read goes to the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl BalanceCache for NullCache {
    fn get(&self, _id: AccountId) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    fn put(&self, _id: AccountId, _entry: CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate(&self, _id: AccountId) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Cache key for an account under `prefix`.
pub(crate) fn balance_key(prefix: &str, id: AccountId) -> String {
    format!("{prefix}:balance:{id}")
}
