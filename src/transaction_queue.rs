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

//! Thread-safe journal buffer with deduplication.
//!
//! Transactions are queued in memory as they happen and drained in batches
//! by [`Engine::flush_journal`](crate::Engine::flush_journal), so the mutation
//! path never waits on the journal table.

use crate::base::TransactionId;
use crate::transaction::Transaction;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A thread-safe transaction queue with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// to preserve insertion order.
#[derive(Debug, Default)]
pub struct TransactionQueue {
    /// Pending transactions by ID.
    transactions: DashMap<TransactionId, Transaction>,

    /// Pending transaction IDs in FIFO order.
    transaction_ids: SegQueue<TransactionId>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transaction to the queue.
    ///
    /// Returns `false` without queueing if a transaction with the same ID
    /// is already pending.
    pub fn push(&self, transaction: Transaction) -> bool {
        let transaction_id = transaction.id;

        match self.transactions.entry(transaction_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(transaction);
                self.transaction_ids.push(transaction_id);
                true
            }
        }
    }

    /// Removes up to `max` pending transactions in insertion order.
    pub fn drain(&self, max: usize) -> Vec<Transaction> {
        let mut batch = Vec::with_capacity(max.min(self.transaction_ids.len()));
        while batch.len() < max {
            let Some(id) = self.transaction_ids.pop() else {
                break;
            };
            if let Some((_, transaction)) = self.transactions.remove(&id) {
                batch.push(transaction);
            }
        }
        batch
    }

    /// Puts `transactions` back ahead of everything currently pending.
    ///
    /// Records pushed by other threads while this runs may land in front.
    pub fn requeue_front(&self, transactions: Vec<Transaction>) {
        let newer = self.drain(usize::MAX);
        for transaction in transactions.into_iter().chain(newer) {
            self.push(transaction);
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::AccountId;
    use crate::transaction::Actor;

    #[test]
    fn push_rejects_duplicate_ids() {
        let queue = TransactionQueue::new();
        let tx = Transaction::deposit(AccountId::random(), 10, Actor::System);
        assert!(queue.push(tx.clone()));
        assert!(!queue.push(tx));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_preserves_order_and_respects_max() {
        let queue = TransactionQueue::new();
        let id = AccountId::random();
        let txs: Vec<_> = (1..=5)
            .map(|amount| Transaction::deposit(id, amount, Actor::System))
            .collect();
        for tx in &txs {
            queue.push(tx.clone());
        }

        let first = queue.drain(3);
        assert_eq!(first, txs[..3].to_vec());
        assert_eq!(queue.len(), 2);

        let rest = queue.drain(10);
        assert_eq!(rest, txs[3..].to_vec());
        assert!(queue.is_empty());
    }

    #[test]
    fn drained_transaction_can_be_requeued() {
        let queue = TransactionQueue::new();
        let tx = Transaction::deposit(AccountId::random(), 10, Actor::System);
        queue.push(tx.clone());
        let batch = queue.drain(1);
        assert!(queue.push(batch[0].clone()));
        assert_eq!(queue.drain(1), vec![tx]);
    }

    #[test]
    fn requeued_batch_goes_ahead_of_newer_records() {
        let queue = TransactionQueue::new();
        let id = AccountId::random();
        let txs: Vec<_> = (1..=4)
            .map(|amount| Transaction::deposit(id, amount, Actor::System))
            .collect();
        queue.push(txs[0].clone());
        queue.push(txs[1].clone());
        let batch = queue.drain(2);
        queue.push(txs[2].clone());
        queue.push(txs[3].clone());

        queue.requeue_front(batch);
        assert_eq!(queue.drain(usize::MAX), txs);
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let queue = std::sync::Arc::new(TransactionQueue::new());
        let id = AccountId::random();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        queue.push(Transaction::deposit(id, 1, Actor::System));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 800);
        assert_eq!(queue.drain(usize::MAX).len(), 800);
    }
}
