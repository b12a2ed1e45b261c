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

//! Redis-backed balance cache shared by every node.
//!
//! Entries are JSON under `{prefix}:balance:{account}` with `SET EX`, so Redis
//! enforces the TTL. Invalidation is a `DEL` on the shared server, visible to
//! every node on its next read.

use super::{BalanceCache, CacheCounters, CacheEntry, CacheStats, balance_key};
use crate::base::AccountId;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::pool::{Pool, Pooled};
use redis::{Commands, RedisError};
use std::time::Duration;
use tracing::{info, warn};

pub struct RedisCache {
    pool: Pool<redis::Connection>,
    prefix: String,
    counters: CacheCounters,
}

impl RedisCache {
    /// Connects to `config.url` and checks the server answers.
    pub fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| CacheError::Unavailable("no cache url configured".into()))?;
        let client = redis::Client::open(url).map_err(unavailable)?;
        let timeout = config.timeout();

        let pool = Pool::new(config.pool_size, timeout, move || {
            let conn = client
                .get_connection_with_timeout(timeout)
                .map_err(|e| e.to_string())?;
            conn.set_read_timeout(Some(timeout)).map_err(|e| e.to_string())?;
            conn.set_write_timeout(Some(timeout)).map_err(|e| e.to_string())?;
            Ok(conn)
        });

        let cache = Self {
            pool,
            prefix: config.key_prefix.clone(),
            counters: CacheCounters::default(),
        };
        {
            let mut conn = cache.conn()?;
            redis::cmd("PING")
                .query::<String>(&mut *conn)
                .map_err(unavailable)?;
        }
        info!(prefix = %cache.prefix, "balance cache connected");
        Ok(cache)
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn conn(&self) -> Result<Pooled<'_, redis::Connection>, CacheError> {
        self.pool
            .get()
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    /// Runs `f` on a pooled connection, discarding the connection on I/O errors.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> Result<T, RedisError>,
    ) -> Result<T, CacheError> {
        let mut conn = self.conn()?;
        f(&mut conn).map_err(|err| {
            if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
                conn.mark_broken();
            }
            unavailable(err)
        })
    }
}

impl BalanceCache for RedisCache {
    fn get(&self, id: AccountId) -> Result<Option<CacheEntry>, CacheError> {
        let key = balance_key(&self.prefix, id);
        let raw: Option<String> = self.with_conn(|conn| conn.get(&key))?;

        let entry = match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(account = %id, error = %e, "discarding unreadable cache entry");
                    None
                }
            },
            None => None,
        };
        self.counters.record_lookup(entry.is_some());
        Ok(entry)
    }

    fn put(&self, id: AccountId, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let key = balance_key(&self.prefix, id);
        let json = serde_json::to_string(&entry)
            .map_err(|e| CacheError::Unavailable(format!("serialization failed: {e}")))?;
        let seconds = ttl.as_secs().max(1);
        self.with_conn(|conn| conn.set_ex::<_, _, ()>(&key, json, seconds))?;
        self.counters.record_put();
        Ok(())
    }

    fn invalidate(&self, id: AccountId) -> Result<(), CacheError> {
        let key = balance_key(&self.prefix, id);
        self.with_conn(|conn| conn.del::<_, ()>(&key))?;
        self.counters.record_invalidation();
        Ok(())
    }
}

fn unavailable(err: RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}
