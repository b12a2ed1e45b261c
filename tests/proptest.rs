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

//! Property-based tests for the ledger engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! operations, valid or not.

use economy_ledger::{
    Account, AccountId, AccountStore, BalanceChange, Engine, InMemoryStore, LedgerConfig,
    LedgerError, MutationPolicy, SharedMemoryCache,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// A positive amount in minor units.
fn arb_amount() -> impl Strategy<Value = u64> {
    1u64..=5_000
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(usize, u64),
    Withdraw(usize, u64),
    Transfer(usize, usize, u64),
}

fn arb_op(accounts: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..accounts, arb_amount()).prop_map(|(a, n)| Op::Deposit(a, n)),
        (0..accounts, arb_amount()).prop_map(|(a, n)| Op::Withdraw(a, n)),
        (0..accounts, 0..accounts, arb_amount()).prop_map(|(a, b, n)| Op::Transfer(a, b, n)),
    ]
}

fn arb_transfer(accounts: usize) -> impl Strategy<Value = (usize, usize, u64)> {
    (0..accounts, 0..accounts, arb_amount())
}

fn engine() -> (Arc<InMemoryStore>, Engine) {
    let store = Arc::new(InMemoryStore::new());
    let engine = Engine::new(
        LedgerConfig::default(),
        store.clone(),
        Arc::new(SharedMemoryCache::new()),
    );
    (store, engine)
}

fn ids(count: usize) -> Vec<AccountId> {
    (0..count).map(|_| AccountId::random()).collect()
}

// =============================================================================
// Engine Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Transfers alone never create or destroy money.
    #[test]
    fn transfers_conserve_total(
        seed in prop::collection::vec(arb_amount(), 4),
        transfers in prop::collection::vec(arb_transfer(4), 1..40),
    ) {
        let (store, engine) = engine();
        let ids = ids(4);
        for (id, amount) in ids.iter().zip(&seed) {
            engine.deposit(*id, *amount).unwrap();
        }
        let before: i64 = seed.iter().map(|n| *n as i64).sum();

        for (from, to, amount) in transfers {
            let _ = engine.transfer(ids[from], ids[to], amount);
        }

        let after: i64 = ids.iter().map(|id| store.get(*id).unwrap().balance).sum();
        prop_assert_eq!(before, after);
    }

    /// Without `allow_negative`, no sequence of operations drives a balance
    /// below zero, and a refused operation leaves balances untouched.
    #[test]
    fn balances_never_negative(
        ops in prop::collection::vec(arb_op(3), 1..60),
    ) {
        let (_, engine) = engine();
        let ids = ids(3);

        for op in ops {
            let before: Vec<i64> = ids.iter().map(|id| engine.get_balance(*id).unwrap()).collect();
            let result = match op {
                Op::Deposit(a, n) => engine.deposit(ids[a], n).map(|_| ()),
                Op::Withdraw(a, n) => engine.withdraw(ids[a], n).map(|_| ()),
                Op::Transfer(a, b, n) => engine.transfer(ids[a], ids[b], n).map(|_| ()),
            };
            let after: Vec<i64> = ids.iter().map(|id| engine.get_balance(*id).unwrap()).collect();

            prop_assert!(after.iter().all(|balance| *balance >= 0));
            if result.is_err() {
                prop_assert_eq!(before, after);
            }
        }
    }

    /// An overdraw is refused exactly when the amount exceeds the balance.
    #[test]
    fn withdraw_refused_iff_overdraw(
        deposit in arb_amount(),
        withdraw in arb_amount(),
    ) {
        let (_, engine) = engine();
        let id = AccountId::random();
        engine.deposit(id, deposit).unwrap();

        let result = engine.withdraw(id, withdraw);
        if withdraw > deposit {
            prop_assert_eq!(result, Err(LedgerError::InsufficientFunds));
            prop_assert_eq!(engine.get_balance(id).unwrap(), deposit as i64);
        } else {
            prop_assert_eq!(result.unwrap().balance, (deposit - withdraw) as i64);
        }
    }

    /// Concurrent deposits on one account sum exactly, in any interleaving.
    #[test]
    fn concurrent_deposits_are_linearizable(
        deltas in prop::collection::vec(arb_amount(), 2..12),
    ) {
        let (store, engine) = engine();
        let engine = Arc::new(engine);
        let id = AccountId::random();

        let handles: Vec<_> = deltas
            .iter()
            .map(|amount| {
                let engine = engine.clone();
                let amount = *amount;
                thread::spawn(move || engine.deposit(id, amount).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let account = store.get(id).unwrap();
        prop_assert_eq!(account.balance, deltas.iter().map(|n| *n as i64).sum::<i64>());
        prop_assert_eq!(account.revision.0, 1 + deltas.len() as u64);
    }
}

// =============================================================================
// Account Rule Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// `apply` never returns a negative balance lower than the starting one
    /// unless negatives are allowed.
    #[test]
    fn apply_respects_non_negativity(
        balance in -10_000i64..10_000,
        delta in -20_000i64..20_000,
    ) {
        let account = Account::new(AccountId::random(), balance);
        match account.apply(BalanceChange::Delta(delta), MutationPolicy::default()) {
            Ok(next) => {
                prop_assert_eq!(next, balance + delta);
                prop_assert!(next >= 0 || next >= balance);
            }
            Err(err) => {
                prop_assert_eq!(err, LedgerError::InsufficientFunds);
                prop_assert!(balance + delta < 0);
            }
        }
    }

    /// Frozen accounts refuse every change unless the policy bypasses the freeze.
    #[test]
    fn frozen_refuses_all_changes(
        balance in 0i64..10_000,
        delta in -5_000i64..5_000,
    ) {
        let mut account = Account::new(AccountId::random(), balance);
        account.frozen = true;
        prop_assert_eq!(
            account.apply(BalanceChange::Delta(delta), MutationPolicy::default()),
            Err(LedgerError::AccountFrozen)
        );
        if delta > 0 {
            prop_assert_eq!(
                account.apply(BalanceChange::Delta(delta), MutationPolicy::COMPENSATION),
                Ok(balance + delta)
            );
        }
    }
}
