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

//! Currency display and input parsing.
//!
//! The ledger stores integer minor units. Players see and type major units,
//! so this module converts between the two with [`Decimal`] to avoid float
//! drift.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("not a number: {0}")]
    NotANumber(String),

    #[error("amount must be positive")]
    NotPositive,

    #[error("at most {0} decimal places allowed")]
    TooPrecise(u32),

    #[error("amount too large")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    pub name_singular: String,
    pub name_plural: String,
    pub symbol: String,
    /// Minor units per major unit, as a power of ten.
    pub fractional_digits: u32,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            name_singular: "crown".to_string(),
            name_plural: "crowns".to_string(),
            symbol: "♛".to_string(),
            fractional_digits: 2,
        }
    }
}

impl CurrencyConfig {
    /// Minor units as a major-unit decimal.
    pub fn to_major(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.fractional_digits)
    }

    /// Renders a balance such as `♛12.50 crowns` or `♛1.00 crown`.
    pub fn format(&self, minor: i64) -> String {
        let major = self.to_major(minor);
        let name = if major == Decimal::ONE {
            &self.name_singular
        } else {
            &self.name_plural
        };
        format!("{}{} {}", self.symbol, major, name)
    }

    /// Parses a typed major-unit amount (`"12.5"`) into minor units.
    pub fn parse_amount(&self, input: &str) -> Result<u64, AmountError> {
        let value = Decimal::from_str(input.trim())
            .map_err(|_| AmountError::NotANumber(input.to_string()))?;
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive);
        }
        if value.normalize().scale() > self.fractional_digits {
            return Err(AmountError::TooPrecise(self.fractional_digits));
        }
        let scale = Decimal::from(10u64.pow(self.fractional_digits));
        value
            .checked_mul(scale)
            .and_then(|minor| minor.to_u64())
            .filter(|minor| *minor <= i64::MAX as u64)
            .ok_or(AmountError::TooLarge)
    }

    /// Parses a balance that may be zero or, for admin sets, negative.
    pub fn parse_balance(&self, input: &str) -> Result<i64, AmountError> {
        let trimmed = input.trim();
        if let Some(rest) = trimmed.strip_prefix('-') {
            return self.parse_amount(rest).map(|minor| -(minor as i64));
        }
        let value = Decimal::from_str(trimmed)
            .map_err(|_| AmountError::NotANumber(input.to_string()))?;
        if value.is_zero() {
            return Ok(0);
        }
        self.parse_amount(trimmed).map(|minor| minor as i64)
    }
}
