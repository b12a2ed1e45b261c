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

//! Two-account transfers.
//!
//! A transfer is a withdrawal from the source followed by a deposit to the
//! destination, each its own compare-and-set on its own row. The store has no
//! multi-row transaction, so a deposit that fails after the withdrawal
//! committed is undone with a compensating deposit back to the source.
//!
//! Both accounts' critical sections are held for the whole sequence, taken in
//! ascending identity order so opposite transfers cannot deadlock.

use crate::account::{Account, BalanceChange, MutationPolicy, amount_to_delta};
use crate::base::AccountId;
use crate::engine::Engine;
use crate::error::LedgerError;
use crate::transaction::{Actor, Transaction};
use serde::Serialize;
use tracing::{debug, error, warn};

/// Post-transfer snapshots of both accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub source: Account,
    pub destination: Account,
    pub amount: u64,
}

impl Engine {
    /// Moves `amount` from `from` to `to`, attributed to the paying player.
    pub fn transfer(&self, from: AccountId, to: AccountId, amount: u64) -> Result<TransferReceipt, LedgerError> {
        self.transfer_as(from, to, amount, Actor::Player(from))
    }

    /// Moves `amount` from `from` to `to`.
    ///
    /// Either both balances change or neither does, except when the
    /// compensating deposit itself fails. That case returns
    /// [`LedgerError::TransferInconsistent`] and the source is short by
    /// `amount` until reconciled by hand.
    pub fn transfer_as(
        &self,
        from: AccountId,
        to: AccountId,
        amount: u64,
        actor: Actor,
    ) -> Result<TransferReceipt, LedgerError> {
        let transaction = Transaction::transfer(from, to, amount, actor);
        let result = self.transfer_inner(from, to, amount);
        match &result {
            Ok(_) => self.record(transaction),
            Err(err) => self.record(transaction.rejected(err)),
        }
        result
    }

    fn transfer_inner(&self, from: AccountId, to: AccountId, amount: u64) -> Result<TransferReceipt, LedgerError> {
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }
        let delta = amount_to_delta(amount)?;
        let _guards = self.locks.lock_pair(from, to);

        let policy = MutationPolicy::default();
        let withdrawn = self.mutate_locked(from, BalanceChange::Delta(-delta), policy)?;

        let deposited = match self.mutate_locked(to, BalanceChange::Delta(delta), policy) {
            Ok(commit) => commit,
            Err(cause) => return Err(self.compensate(from, to, amount, delta, cause)),
        };

        debug!(%from, %to, amount, "transfer committed");
        Ok(TransferReceipt {
            source: withdrawn.account,
            destination: deposited.account,
            amount,
        })
    }

    /// Returns the withdrawn amount to `from` after the deposit leg failed.
    fn compensate(
        &self,
        from: AccountId,
        to: AccountId,
        amount: u64,
        delta: i64,
        cause: LedgerError,
    ) -> LedgerError {
        warn!(%from, %to, amount, error = %cause, "deposit leg failed, compensating");
        match self.mutate_locked(from, BalanceChange::Delta(delta), MutationPolicy::COMPENSATION) {
            Ok(_) => LedgerError::TransferFailed {
                cause: Box::new(cause),
            },
            Err(compensation) => {
                error!(
                    %from,
                    %to,
                    amount,
                    error = %cause,
                    compensation_error = %compensation,
                    "transfer left ledger inconsistent, source needs reconciliation"
                );
                LedgerError::TransferInconsistent {
                    from,
                    to,
                    amount,
                    cause: Box::new(cause),
                    compensation: Box::new(compensation),
                }
            }
        }
    }
}
