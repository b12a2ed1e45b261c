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

//! Account records and the balance rules applied to them.
//!
//! An [`Account`] is a plain snapshot of a store row. The engine reads one,
//! computes the next balance with [`Account::apply`], and hands the result to
//! the store's compare-and-set.
//!
//! # Example
//!
//! ```
//! use economy_ledger::{Account, AccountId, BalanceChange, MutationPolicy};
//!
//! let account = Account::new(AccountId::random(), 500);
//! let next = account
//!     .apply(BalanceChange::Delta(-200), MutationPolicy::default())
//!     .unwrap();
//! assert_eq!(next, 300);
//! ```

use crate::LedgerError;
use crate::base::{AccountId, Revision};
use serde::{Deserialize, Serialize};

/// Snapshot of a stored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Last known display name, if any.
    pub name: Option<String>,
    /// Balance in minor currency units.
    pub balance: i64,
    pub revision: Revision,
    pub frozen: bool,
}

/// How a mutation changes the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// Add (or, when negative, subtract) minor units.
    Delta(i64),
    /// Replace the balance outright.
    Set(i64),
}

/// Rules a mutation is allowed to bend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationPolicy {
    /// Permit the balance to end below zero.
    pub allow_negative: bool,
    /// Permit writes to a frozen account.
    pub bypass_frozen: bool,
}

impl MutationPolicy {
    /// Returning money taken by a failed transfer: never blocked by a freeze.
    pub const COMPENSATION: MutationPolicy = MutationPolicy {
        allow_negative: false,
        bypass_frozen: true,
    };

    pub fn allow_negative(allow_negative: bool) -> Self {
        Self {
            allow_negative,
            bypass_frozen: false,
        }
    }
}

impl Account {
    pub fn new(id: AccountId, balance: i64) -> Self {
        Self {
            id,
            name: None,
            balance,
            revision: Revision::INITIAL,
            frozen: false,
        }
    }

    /// Computes the balance after `change`, enforcing the frozen flag and the
    /// non-negativity rule. Does not modify `self`.
    ///
    /// A change that raises the balance is never rejected for being negative,
    /// so an account left below zero by an administrator can still be paid.
    pub fn apply(&self, change: BalanceChange, policy: MutationPolicy) -> Result<i64, LedgerError> {
        if self.frozen && !policy.bypass_frozen {
            return Err(LedgerError::AccountFrozen);
        }

        let next = match change {
            BalanceChange::Delta(delta) => self
                .balance
                .checked_add(delta)
                .ok_or(LedgerError::Overflow)?,
            BalanceChange::Set(target) => target,
        };

        if next < 0 && next < self.balance && !policy.allow_negative {
            return Err(LedgerError::InsufficientFunds);
        }
        Ok(next)
    }
}

/// Converts a positive amount to a signed delta.
pub(crate) fn amount_to_delta(amount: u64) -> Result<i64, LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    i64::try_from(amount).map_err(|_| LedgerError::InvalidAmount)
}
