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

//! Static configuration.
//!
//! Loaded once at startup from TOML and passed by value into the pieces that
//! need it. Nothing in the ledger reads configuration from global state.
//!
//! ```toml
//! [ledger]
//! default_balance = 0
//! allow_admin_negative = false
//! max_retries = 5
//! cache_ttl_secs = 30
//! journal = true
//!
//! [storage]
//! path = "economy.db"
//! pool_size = 4
//!
//! [cache]
//! url = "redis://127.0.0.1/"
//!
//! [currency]
//! name_singular = "crown"
//! name_plural = "crowns"
//! symbol = "♛"
//! ```

use crate::currency::CurrencyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub currency: CurrencyConfig,
}

/// Engine behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Balance of an account on first touch, in minor units.
    pub default_balance: i64,
    /// Lets admin withdrawals and balance sets go below zero.
    pub allow_admin_negative: bool,
    /// Extra compare-and-set attempts after a conflict before giving up.
    pub max_retries: u32,
    pub cache_ttl_secs: u64,
    /// Record every mutation in the transaction journal.
    pub journal: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_balance: 0,
            allow_admin_negative: false,
            max_retries: 5,
            cache_ttl_secs: 30,
            journal: true,
        }
    }
}

impl LedgerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Relational store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    pub checkout_timeout_ms: u64,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Journal records older than this are purged; `None` keeps everything.
    pub transaction_retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("economy.db"),
            pool_size: 4,
            checkout_timeout_ms: 2_000,
            busy_timeout_ms: 2_000,
            transaction_retention_days: Some(90),
        }
    }
}

impl StorageConfig {
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Shared cache connection settings. Without a `url` the ledger runs store-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub url: Option<String>,
    pub key_prefix: String,
    pub pool_size: usize,
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "economy".to_string(),
            pool_size: 4,
            timeout_ms: 250,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.default_balance < 0 {
            return Err(ConfigError::Invalid(
                "ledger.default_balance must not be negative".into(),
            ));
        }
        if self.storage.pool_size == 0 || self.cache.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.storage.checkout_timeout_ms == 0 || self.cache.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.currency.fractional_digits > 9 {
            return Err(ConfigError::Invalid(
                "currency.fractional_digits must be at most 9".into(),
            ));
        }
        Ok(())
    }
}
