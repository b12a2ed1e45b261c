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

//! Per-account critical sections.
//!
//! These locks only serialize writers inside one process. Writers on other
//! processes are caught by the store's compare-and-set instead.

use crate::base::AccountId;
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;

pub(crate) type AccountGuard = ArcMutexGuard<RawMutex, ()>;

/// Guards for two accounts, released in reverse acquisition order.
pub(crate) struct PairGuard {
    // Field order is drop order.
    _second: AccountGuard,
    _first: AccountGuard,
}

#[derive(Debug, Default)]
pub(crate) struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks until the critical section for `id` is free.
    pub(crate) fn lock(&self, id: AccountId) -> AccountGuard {
        // Clone the Arc out so the map shard is released before blocking.
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_arc()
    }

    /// Locks two distinct accounts in ascending identity order.
    pub(crate) fn lock_pair(&self, a: AccountId, b: AccountId) -> PairGuard {
        debug_assert_ne!(a, b, "lock_pair needs two distinct accounts");
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first);
        let second = self.lock(second);
        PairGuard {
            _second: second,
            _first: first,
        }
    }
}
