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

//! Shared in-process balance cache.
//!
//! Clones share one map, so engines built from clones of the same
//! `SharedMemoryCache` see each other's puts and invalidations the way nodes
//! sharing one Redis server do.

use super::{BalanceCache, CacheCounters, CacheEntry, CacheStats};
use crate::base::AccountId;
use crate::error::CacheError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Shared {
    entries: DashMap<AccountId, (CacheEntry, Instant)>,
    counters: CacheCounters,
    offline: AtomicBool,
}

#[derive(Debug, Default, Clone)]
pub struct SharedMemoryCache {
    shared: Arc<Shared>,
}

impl SharedMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.counters.snapshot()
    }

    /// Makes every call fail with [`CacheError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Live entries, ignoring expiry bookkeeping.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shared
            .entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache offline".into()));
        }
        Ok(())
    }
}

impl BalanceCache for SharedMemoryCache {
    fn get(&self, id: AccountId) -> Result<Option<CacheEntry>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let found = match self.shared.entries.get(&id) {
            Some(entry) if entry.value().1 > now => Some(entry.value().0),
            _ => None,
        };
        if found.is_none() {
            self.shared.entries.remove_if(&id, |_, (_, expires)| *expires <= now);
        }
        self.shared.counters.record_lookup(found.is_some());
        Ok(found)
    }

    /// Never replaces a live entry with an older revision.
    fn put(&self, id: AccountId, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let expires = now + ttl;
        match self.shared.entries.entry(id) {
            Entry::Occupied(mut occupied) => {
                let (current, current_expires) = *occupied.get();
                if current_expires <= now || current.revision <= entry.revision {
                    occupied.insert((entry, expires));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((entry, expires));
            }
        }
        self.shared.counters.record_put();
        Ok(())
    }

    fn invalidate(&self, id: AccountId) -> Result<(), CacheError> {
        self.check_online()?;
        self.shared.entries.remove(&id);
        self.shared.counters.record_invalidation();
        Ok(())
    }
}
