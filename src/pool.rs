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

//! Bounded blocking connection pool.
//!
//! Connections are opened lazily up to `max_size` and parked in a crossbeam
//! channel while idle. A checkout that finds neither an idle connection nor
//! spare capacity waits at most `checkout_timeout`, then fails with
//! [`PoolError::Timeout`].
//!
//! Store and cache backends check a connection out for one call and return it
//! before the call completes; nothing holds a connection while waiting on an
//! account lock.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a blocked checkout rechecks for freed capacity.
const RECHECK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    #[error("failed to open connection: {0}")]
    Connect(String),
}

type Connect<T> = Box<dyn Fn() -> Result<T, String> + Send + Sync>;

pub struct Pool<T> {
    idle_tx: Sender<T>,
    idle_rx: Receiver<T>,
    /// Connections currently open, idle or checked out.
    open: AtomicUsize,
    max_size: usize,
    checkout_timeout: Duration,
    connect: Connect<T>,
}

impl<T> Pool<T> {
    pub fn new<F>(max_size: usize, checkout_timeout: Duration, connect: F) -> Self
    where
        F: Fn() -> Result<T, String> + Send + Sync + 'static,
    {
        let max_size = max_size.max(1);
        let (idle_tx, idle_rx) = channel::bounded(max_size);
        Self {
            idle_tx,
            idle_rx,
            open: AtomicUsize::new(0),
            max_size,
            checkout_timeout,
            connect: Box::new(connect),
        }
    }

    /// Checks out a connection, opening one if the pool has spare capacity.
    pub fn get(&self) -> Result<Pooled<'_, T>, PoolError> {
        let deadline = Instant::now() + self.checkout_timeout;
        loop {
            if let Ok(conn) = self.idle_rx.try_recv() {
                return Ok(self.wrap(conn));
            }
            if let Some(opened) = self.try_open() {
                return opened;
            }

            // Broken connections free a slot without sending anything, so
            // waiters wake periodically to look for spare capacity.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout(self.checkout_timeout));
            }
            match self.idle_rx.recv_timeout(remaining.min(RECHECK_INTERVAL)) {
                Ok(conn) => return Ok(self.wrap(conn)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PoolError::Timeout(self.checkout_timeout));
                }
            }
        }
    }

    /// Opens a new connection if under `max_size`; `None` when full.
    fn try_open(&self) -> Option<Result<Pooled<'_, T>, PoolError>> {
        let mut open = self.open.load(Ordering::Acquire);
        while open < self.max_size {
            match self
                .open
                .compare_exchange(open, open + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return Some(match (self.connect)() {
                        Ok(conn) => Ok(self.wrap(conn)),
                        Err(err) => {
                            self.open.fetch_sub(1, Ordering::AcqRel);
                            Err(PoolError::Connect(err))
                        }
                    });
                }
                Err(actual) => open = actual,
            }
        }
        None
    }

    /// Number of connections currently open.
    #[cfg(test)]
    fn size(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    fn wrap(&self, conn: T) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            conn: Some(conn),
            broken: false,
        }
    }
}

/// A checked-out connection; returns itself to the pool on drop.
pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    conn: Option<T>,
    broken: bool,
}

impl<T> Pooled<'_, T> {
    /// Closes the connection instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || self.pool.idle_tx.try_send(conn).is_err() {
            self.pool.open.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
