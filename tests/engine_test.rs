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

//! Integration tests for single-account engine operations.
//!
//! Engines here share an [`InMemoryStore`] and a [`SharedMemoryCache`] the way
//! server processes share one database and one Redis.

use economy_ledger::{
    AccountId, AccountStore, Actor, BalanceCache, Engine, InMemoryStore, LedgerConfig, LedgerError,
    SharedMemoryCache, TransactionKind, TransactionOutcome,
};
use std::sync::Arc;
use std::thread;

// === Helpers ===

struct Cluster {
    store: Arc<InMemoryStore>,
    cache: SharedMemoryCache,
}

impl Cluster {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            cache: SharedMemoryCache::new(),
        }
    }

    fn node(&self) -> Engine {
        self.node_with(LedgerConfig::default())
    }

    fn node_with(&self, config: LedgerConfig) -> Engine {
        Engine::new(config, self.store.clone(), Arc::new(self.cache.clone()))
    }
}

// === Scenarios ===

#[test]
fn new_account_reads_default_balance() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    assert_eq!(engine.get_balance(p1).unwrap(), 0);
    assert!(engine.has_account(p1).unwrap());
}

#[test]
fn configured_default_balance_applies_on_first_touch() {
    let cluster = Cluster::new();
    let engine = cluster.node_with(LedgerConfig {
        default_balance: 1000,
        ..LedgerConfig::default()
    });
    let p1 = AccountId::random();

    assert_eq!(engine.get_balance(p1).unwrap(), 1000);
    assert_eq!(engine.deposit(p1, 1).unwrap().balance, 1001);
}

#[test]
fn deposit_then_read() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    engine.deposit(p1, 500).unwrap();
    assert_eq!(engine.get_balance(p1).unwrap(), 500);
}

#[test]
fn overdraw_is_rejected_and_balance_unchanged() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 500).unwrap();

    assert_eq!(engine.withdraw(p1, 600), Err(LedgerError::InsufficientFunds));
    assert_eq!(engine.get_balance(p1).unwrap(), 500);
}

#[test]
fn concurrent_deposits_are_not_lost() {
    let cluster = Cluster::new();
    let engine = Arc::new(cluster.node());
    let p1 = AccountId::random();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.deposit(p1, 100).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.get_balance(p1).unwrap(), 200);
}

#[test]
fn store_outage_fails_withdraw_without_touching_cache() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 500).unwrap();
    assert_eq!(engine.get_balance(p1).unwrap(), 500);
    let invalidations = cluster.cache.stats().invalidations;

    cluster.store.set_offline(true);
    assert!(matches!(
        engine.withdraw(p1, 100),
        Err(LedgerError::StoreUnavailable(_))
    ));
    assert_eq!(cluster.cache.stats().invalidations, invalidations);
    assert_eq!(engine.get_balance(p1).unwrap(), 500);

    cluster.store.set_offline(false);
    assert_eq!(cluster.store.get(p1).unwrap().balance, 500);
}

#[test]
fn failed_write_leaves_balance_and_cache_alone() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 500).unwrap();
    engine.get_balance(p1).unwrap();
    let invalidations = cluster.cache.stats().invalidations;

    cluster.store.fail_writes([cluster.store.write_count() + 1]);
    assert!(matches!(
        engine.withdraw(p1, 100),
        Err(LedgerError::StoreUnavailable(_))
    ));
    assert_eq!(cluster.cache.stats().invalidations, invalidations);
    assert_eq!(engine.get_balance(p1).unwrap(), 500);
}

// === Read path ===

#[test]
fn second_read_is_served_from_cache() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    engine.get_balance(p1).unwrap();
    engine.get_balance(p1).unwrap();

    let stats = cluster.cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.puts, 1);
}

#[test]
fn write_invalidates_instead_of_populating() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.get_balance(p1).unwrap();

    engine.deposit(p1, 50).unwrap();
    assert_eq!(cluster.cache.get(p1).unwrap(), None);
    assert_eq!(engine.get_balance(p1).unwrap(), 50);
}

#[test]
fn cache_outage_falls_back_to_store() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    cluster.cache.set_offline(true);

    engine.deposit(p1, 75).unwrap();
    assert_eq!(engine.get_balance(p1).unwrap(), 75);
    assert!(engine.has_account(p1).unwrap());
}

#[test]
fn other_node_sees_write_after_invalidation() {
    let cluster = Cluster::new();
    let node_a = cluster.node();
    let node_b = cluster.node();
    let p1 = AccountId::random();

    assert_eq!(node_b.get_balance(p1).unwrap(), 0);
    node_a.deposit(p1, 300).unwrap();
    assert_eq!(node_b.get_balance(p1).unwrap(), 300);

    node_b.withdraw(p1, 100).unwrap();
    assert_eq!(node_a.get_balance(p1).unwrap(), 200);
}

#[test]
fn has_account_does_not_create() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    assert!(!engine.has_account(p1).unwrap());
    assert!(engine.accounts().unwrap().is_empty());
}

#[test]
fn has_account_reports_outage() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    cluster.store.set_offline(true);

    assert!(matches!(
        engine.has_account(AccountId::random()),
        Err(LedgerError::StoreUnavailable(_))
    ));
}

// === Mutation rules ===

#[test]
fn zero_amounts_are_invalid() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    assert_eq!(engine.deposit(p1, 0), Err(LedgerError::InvalidAmount));
    assert_eq!(engine.withdraw(p1, 0), Err(LedgerError::InvalidAmount));
    assert_eq!(engine.mutate(p1, 0, false), Err(LedgerError::InvalidAmount));
}

#[test]
fn oversized_amount_is_invalid() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    assert_eq!(
        engine.deposit(AccountId::random(), u64::MAX),
        Err(LedgerError::InvalidAmount)
    );
}

#[test]
fn deposit_past_max_overflows() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, i64::MAX as u64).unwrap();

    assert_eq!(engine.deposit(p1, 1), Err(LedgerError::Overflow));
    assert_eq!(engine.get_balance(p1).unwrap(), i64::MAX);
}

#[test]
fn mutate_with_allow_negative_overdraws() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    assert_eq!(
        engine.mutate(p1, -100, false),
        Err(LedgerError::InsufficientFunds)
    );
    assert_eq!(engine.mutate(p1, -100, true).unwrap().balance, -100);
    assert_eq!(engine.mutate(p1, 40, false).unwrap().balance, -60);
}

#[test]
fn revision_rises_by_one_per_commit() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    let first = engine.deposit(p1, 10).unwrap().revision;
    let second = engine.deposit(p1, 10).unwrap().revision;
    assert_eq!(second, first.next());

    engine.withdraw(p1, 1000).unwrap_err();
    assert_eq!(engine.account(p1).unwrap().revision, second);
}

#[test]
fn frozen_account_rejects_mutations_but_reads() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 100).unwrap();

    assert!(engine.freeze(p1).unwrap().frozen);
    assert_eq!(engine.deposit(p1, 1), Err(LedgerError::AccountFrozen));
    assert_eq!(engine.withdraw(p1, 1), Err(LedgerError::AccountFrozen));
    assert_eq!(engine.get_balance(p1).unwrap(), 100);

    assert!(!engine.unfreeze(p1).unwrap().frozen);
    assert_eq!(engine.deposit(p1, 1).unwrap().balance, 101);
}

#[test]
fn admin_withdraw_respects_negative_setting() {
    let cluster = Cluster::new();
    let strict = cluster.node();
    let lenient = cluster.node_with(LedgerConfig {
        allow_admin_negative: true,
        ..LedgerConfig::default()
    });
    let p1 = AccountId::random();

    assert_eq!(
        strict.admin_withdraw(p1, 50, "mod"),
        Err(LedgerError::InsufficientFunds)
    );
    assert_eq!(lenient.admin_withdraw(p1, 50, "mod").unwrap().balance, -50);

    // Still cannot be pushed further down by a player.
    assert_eq!(strict.withdraw(p1, 1), Err(LedgerError::InsufficientFunds));
    assert_eq!(strict.deposit(p1, 80).unwrap().balance, 30);
}

#[test]
fn set_balance_overwrites() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 100).unwrap();

    assert_eq!(engine.set_balance(p1, 750, "mod").unwrap().balance, 750);
    assert_eq!(engine.get_balance(p1).unwrap(), 750);
    assert_eq!(engine.set_balance(p1, 0, "mod").unwrap().balance, 0);
    assert_eq!(
        engine.set_balance(p1, -1, "mod"),
        Err(LedgerError::InsufficientFunds)
    );
}

// === Names and rankings ===

#[test]
fn rename_and_find_by_name() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    engine.rename(p1, "Steve").unwrap();
    let found = engine.find_by_name("Steve").unwrap().unwrap();
    assert_eq!(found.id, p1);
    assert_eq!(engine.find_by_name("Alex").unwrap(), None);
}

#[test]
fn top_accounts_skip_empty_and_rank_by_balance() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let (a, b, c) = (AccountId::random(), AccountId::random(), AccountId::random());
    engine.deposit(a, 100).unwrap();
    engine.deposit(b, 300).unwrap();
    engine.get_balance(c).unwrap();

    let top: Vec<_> = engine
        .top_accounts(10)
        .unwrap()
        .into_iter()
        .map(|account| account.id)
        .collect();
    assert_eq!(top, vec![b, a]);
    assert_eq!(engine.top_accounts(1).unwrap().len(), 1);
}

// === Journal ===

#[test]
fn journal_records_commits_and_rejections() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    engine.deposit(p1, 500).unwrap();
    engine.withdraw(p1, 600).unwrap_err();
    engine.admin_deposit(p1, 5, "mod").unwrap();
    assert_eq!(engine.pending_journal(), 3);
    assert_eq!(engine.flush_journal().unwrap(), 3);
    assert_eq!(engine.pending_journal(), 0);

    let journal = cluster.store.transactions();
    assert_eq!(journal[0].kind, TransactionKind::Deposit);
    assert_eq!(journal[0].destination, Some(p1));
    assert!(journal[0].is_committed());
    assert_eq!(journal[1].kind, TransactionKind::Withdraw);
    assert_eq!(
        journal[1].outcome,
        TransactionOutcome::Rejected("insufficient funds".into())
    );
    assert_eq!(journal[2].actor, Actor::Admin("mod".into()));
}

#[test]
fn set_balance_journals_the_difference() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    engine.set_balance(p1, 500, "mod").unwrap();
    engine.set_balance(p1, 200, "mod").unwrap();
    engine.set_balance(p1, 200, "mod").unwrap();
    engine.flush_journal().unwrap();

    let journal = cluster.store.transactions();
    assert_eq!(journal.len(), 2);
    assert_eq!((journal[0].kind, journal[0].amount), (TransactionKind::Deposit, 500));
    assert_eq!((journal[1].kind, journal[1].amount), (TransactionKind::Withdraw, 300));
}

#[test]
fn rejected_set_journals_the_attempted_difference() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 100).unwrap();

    assert_eq!(
        engine.set_balance(p1, -40, "console"),
        Err(LedgerError::InsufficientFunds)
    );
    engine.flush_journal().unwrap();

    let journal = cluster.store.transactions();
    let rejected = &journal[1];
    assert_eq!(rejected.kind, TransactionKind::Withdraw);
    assert_eq!((rejected.source, rejected.destination), (Some(p1), None));
    assert_eq!(rejected.amount, 140);
    assert_eq!(rejected.actor, Actor::Admin("console".into()));
    assert_eq!(
        rejected.outcome,
        TransactionOutcome::Rejected("insufficient funds".into())
    );
    assert_eq!(cluster.store.get(p1).unwrap().balance, 100);
}

#[test]
fn set_during_outage_journals_the_target() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();

    cluster.store.set_offline(true);
    assert!(matches!(
        engine.set_balance(p1, 30, "console"),
        Err(LedgerError::StoreUnavailable(_))
    ));
    cluster.store.set_offline(false);
    engine.flush_journal().unwrap();

    let journal = cluster.store.transactions();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].kind, TransactionKind::Set);
    assert_eq!((journal[0].source, journal[0].destination), (None, Some(p1)));
    assert_eq!(journal[0].amount, 30);
    assert!(!journal[0].is_committed());
}

#[test]
fn failed_flush_keeps_records() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 10).unwrap();

    cluster.store.set_offline(true);
    assert!(engine.flush_journal().is_err());
    assert_eq!(engine.pending_journal(), 1);

    cluster.store.set_offline(false);
    assert_eq!(engine.flush_journal().unwrap(), 1);
    assert_eq!(cluster.store.transactions().len(), 1);
}

#[test]
fn failed_flush_keeps_journal_order() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    for _ in 0..300 {
        engine.deposit(p1, 1).unwrap();
    }

    cluster.store.set_offline(true);
    assert!(engine.flush_journal().is_err());
    cluster.store.set_offline(false);
    engine.withdraw(p1, 5).unwrap();

    assert_eq!(engine.flush_journal().unwrap(), 301);
    let journal = cluster.store.transactions();
    assert!(journal[..300].iter().all(|tx| tx.kind == TransactionKind::Deposit));
    assert_eq!((journal[300].kind, journal[300].amount), (TransactionKind::Withdraw, 5));
}

#[test]
fn has_account_falls_back_to_store_when_cache_is_down() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    let p1 = AccountId::random();
    engine.deposit(p1, 10).unwrap();

    cluster.cache.set_offline(true);
    assert!(engine.has_account(p1).unwrap());
    assert!(!engine.has_account(AccountId::random()).unwrap());
}

#[test]
fn disabled_journal_records_nothing() {
    let cluster = Cluster::new();
    let engine = cluster.node_with(LedgerConfig {
        journal: false,
        ..LedgerConfig::default()
    });
    engine.deposit(AccountId::random(), 10).unwrap();
    assert_eq!(engine.pending_journal(), 0);
}

#[test]
fn purge_respects_cutoff() {
    let cluster = Cluster::new();
    let engine = cluster.node();
    engine.deposit(AccountId::random(), 10).unwrap();
    engine.flush_journal().unwrap();

    assert_eq!(engine.purge_journal(chrono::Duration::days(1)).unwrap(), 0);
    assert_eq!(engine.purge_journal(chrono::Duration::days(-1)).unwrap(), 1);
    assert!(cluster.store.transactions().is_empty());
}
