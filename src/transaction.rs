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

//! Journal records.
//!
//! Every deposit, withdrawal and transfer the engine attempts can be recorded
//! as a [`Transaction`], committed or rejected, for later audit.

use crate::LedgerError;
use crate::base::{AccountId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Transfer,
    /// Balance overwrite whose starting balance is unknown.
    Set,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Transfer => "transfer",
            Self::Set => "set",
        }
    }
}

/// Who asked for a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The ledger itself or an unattributed provider call.
    System,
    Player(AccountId),
    Admin(String),
    Plugin(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Player(id) => write!(f, "player:{id}"),
            Self::Admin(name) => write!(f, "admin:{name}"),
            Self::Plugin(name) => write!(f, "plugin:{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Committed,
    Rejected(String),
}

/// One journaled ledger operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub kind: TransactionKind,
    /// Account debited; `None` for pure deposits.
    pub source: Option<AccountId>,
    /// Account credited; `None` for pure withdrawals.
    pub destination: Option<AccountId>,
    /// Minor units moved. Always positive.
    pub amount: u64,
    pub actor: Actor,
    pub outcome: TransactionOutcome,
}

impl Transaction {
    fn new(
        kind: TransactionKind,
        source: Option<AccountId>,
        destination: Option<AccountId>,
        amount: u64,
        actor: Actor,
    ) -> Self {
        Self {
            id: TransactionId::random(),
            timestamp: Utc::now(),
            kind,
            source,
            destination,
            amount,
            actor,
            outcome: TransactionOutcome::Committed,
        }
    }

    pub fn deposit(account: AccountId, amount: u64, actor: Actor) -> Self {
        Self::new(TransactionKind::Deposit, None, Some(account), amount, actor)
    }

    pub fn withdraw(account: AccountId, amount: u64, actor: Actor) -> Self {
        Self::new(TransactionKind::Withdraw, Some(account), None, amount, actor)
    }

    pub fn transfer(from: AccountId, to: AccountId, amount: u64, actor: Actor) -> Self {
        Self::new(TransactionKind::Transfer, Some(from), Some(to), amount, actor)
    }

    /// Overwrite to `target`. A negative target names the account as the
    /// source, a non-negative one as the destination.
    pub fn set(account: AccountId, target: i64, actor: Actor) -> Self {
        let amount = target.unsigned_abs();
        if target < 0 {
            Self::new(TransactionKind::Set, Some(account), None, amount, actor)
        } else {
            Self::new(TransactionKind::Set, None, Some(account), amount, actor)
        }
    }

    /// Deposit or withdrawal of `delta`; `None` when it is zero.
    pub fn adjustment(account: AccountId, delta: i64, actor: Actor) -> Option<Self> {
        let amount = delta.unsigned_abs();
        match delta.signum() {
            1 => Some(Self::deposit(account, amount, actor)),
            -1 => Some(Self::withdraw(account, amount, actor)),
            _ => None,
        }
    }

    /// Marks the transaction as rejected with the error's message.
    pub fn rejected(mut self, error: &LedgerError) -> Self {
        self.outcome = TransactionOutcome::Rejected(error.to_string());
        self
    }

    pub fn is_committed(&self) -> bool {
        self.outcome == TransactionOutcome::Committed
    }
}
