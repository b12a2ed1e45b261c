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

//! # Economy Ledger
//!
//! Balance ledger for a multi-server game economy. Several server processes
//! share one relational store and one cache; each runs its own [`Engine`].
//!
//! ## Core Components
//!
//! - [`AccountStore`]: Authoritative account rows with revision-checked writes
//! - [`BalanceCache`]: Shared, short-lived copies of balances for fast reads
//! - [`Engine`]: Reads, deposits, withdrawals and administrative changes
//! - [`Engine::transfer`]: Two-account moves with compensation on failure
//! - [`LedgerError`]: Every way an operation can be refused or fail
//!
//! ## Example
//!
//! ```
//! use economy_ledger::{AccountId, Engine, InMemoryStore, LedgerConfig, SharedMemoryCache};
//! use std::sync::Arc;
//!
//! let engine = Engine::new(
//!     LedgerConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(SharedMemoryCache::new()),
//! );
//!
//! let (alice, bob) = (AccountId::random(), AccountId::random());
//! engine.deposit(alice, 100).unwrap();
//! engine.transfer(alice, bob, 30).unwrap();
//!
//! assert_eq!(engine.get_balance(alice).unwrap(), 70);
//! assert_eq!(engine.get_balance(bob).unwrap(), 30);
//! ```
//!
//! ## Consistency
//!
//! Writes never trust the cache. Each one reads the row from the store,
//! compare-and-sets it against the revision it read and then invalidates the
//! cached copy. A reader on another node sees the new balance once its cached
//! copy is gone, at the latest after `cache_ttl_secs`.

pub mod account;
mod base;
pub mod cache;
pub mod config;
mod coordinator;
pub mod currency;
mod engine;
pub mod error;
mod locks;
mod pool;
pub mod store;
mod transaction;
mod transaction_queue;

pub use account::{Account, BalanceChange, MutationPolicy};
pub use base::{AccountId, Revision, TransactionId};
pub use cache::{BalanceCache, CacheEntry, CacheStats, NullCache, RedisCache, SharedMemoryCache};
pub use config::{CacheConfig, Config, ConfigError, LedgerConfig, StorageConfig};
pub use coordinator::TransferReceipt;
pub use currency::{AmountError, CurrencyConfig};
pub use engine::Engine;
pub use error::{CacheError, LedgerError, StoreError};
pub use pool::PoolError;
pub use store::{AccountStore, InMemoryStore, SqliteStore};
pub use transaction::{Actor, Transaction, TransactionKind, TransactionOutcome};
pub use transaction_queue::TransactionQueue;
