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

//! Error types for the ledger, its store and its cache.
//!
//! [`LedgerError`] is what callers see. Business rejections
//! ([`LedgerError::is_rejection`]) are kept apart from infrastructure failures
//! so the command layer can word player-facing messages without looking at
//! engine internals.

use crate::base::{AccountId, Revision};
use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or does not fit the balance type
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Withdrawal would take the balance below zero
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Resulting balance does not fit in 64 bits
    #[error("balance overflow")]
    Overflow,

    /// Account has been frozen by an administrator
    #[error("account is frozen")]
    AccountFrozen,

    /// Source and destination of a transfer are the same account
    #[error("cannot transfer to the same account")]
    SelfTransfer,

    /// Concurrent writers kept winning the compare-and-set race
    #[error("account contention: gave up after {attempts} attempts")]
    Contention { attempts: u32 },

    /// The account store failed or timed out
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Deposit leg failed; the withdrawn amount was returned to the source
    #[error("transfer failed: {cause}")]
    TransferFailed {
        #[source]
        cause: Box<LedgerError>,
    },

    /// Deposit leg failed and so did the compensating deposit.
    /// Needs manual reconciliation.
    #[error(
        "transfer inconsistent: {amount} withdrawn from {from} for {to} was not returned \
         (deposit: {cause}; compensation: {compensation})"
    )]
    TransferInconsistent {
        from: AccountId,
        to: AccountId,
        amount: u64,
        #[source]
        cause: Box<LedgerError>,
        compensation: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Expected business outcome; report to the player, never retry.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::InvalidAmount
            | Self::InsufficientFunds
            | Self::Overflow
            | Self::AccountFrozen
            | Self::SelfTransfer => true,
            Self::TransferFailed { cause } => cause.is_rejection(),
            _ => false,
        }
    }

    /// Transient failure; the caller may try the whole operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Contention { .. } | Self::StoreUnavailable(_) => true,
            Self::TransferFailed { cause } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Money is in flight and must be fixed by an operator.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, Self::TransferInconsistent { .. })
    }
}

/// Account store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("account not found")]
    NotFound,

    /// Compare-and-set lost against another writer
    #[error("revision conflict (expected {expected}, found {actual})")]
    Conflict { expected: Revision, actual: Revision },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Balance cache errors. Always recoverable by going to the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
