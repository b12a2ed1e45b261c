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

use clap::{Parser, Subcommand};
use csv::Writer;
use economy_ledger::{
    Account, AccountId, AmountError, BalanceCache, Config, ConfigError, CurrencyConfig, Engine,
    LedgerError, NullCache, RedisCache, SqliteStore, StoreError,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Name recorded as the actor for changes made from this tool.
const OPERATOR: &str = "console";

/// Economy Ledger - operate on the shared balance ledger
///
/// Connects to the configured SQLite database and, when `cache.url` is set,
/// the shared Redis cache, so changes made here are seen by running servers.
#[derive(Parser, Debug)]
#[command(name = "economy-ledger")]
#[command(about = "Inspect and adjust economy balances", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show an account's balance
    Balance { account: String },
    /// Grant money to an account
    Deposit { account: String, amount: String },
    /// Take money from an account
    Withdraw { account: String, amount: String },
    /// Move money between two accounts
    Pay {
        from: String,
        to: String,
        amount: String,
    },
    /// Overwrite an account's balance
    Set { account: String, amount: String },
    /// Block all balance changes on an account
    Freeze { account: String },
    /// Lift a freeze
    Unfreeze { account: String },
    /// Set an account's display name
    Rename { account: String, name: String },
    /// List the richest accounts
    Top {
        #[arg(short = 'n', default_value_t = 10)]
        limit: usize,
    },
    /// Write every account as CSV to stdout
    Export,
    /// Delete journal records past the retention period
    Purge,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("invalid amount: {0}")]
    Amount(#[from] AmountError),

    #[error("no account named or identified by '{0}'")]
    UnknownAccount(String),

    #[error("export failed: {0}")]
    Export(#[from] csv::Error),

    #[error("export failed: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let store = Arc::new(SqliteStore::open(&config.storage)?);
    let cache = connect_cache(&config);
    let engine = Engine::new(config.ledger.clone(), store, cache);

    let result = execute(&engine, &config, args.command, &mut std::io::stdout());

    // Flush even when the command was refused; the rejection is journaled too.
    match engine.flush_journal() {
        Ok(0) => {}
        Ok(written) => info!(written, "journal flushed"),
        Err(e) => warn!(error = %e, pending = engine.pending_journal(), "journal not flushed"),
    }
    result
}

fn connect_cache(config: &Config) -> Arc<dyn BalanceCache> {
    if config.cache.url.is_none() {
        return Arc::new(NullCache);
    }
    match RedisCache::connect(&config.cache) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(error = %e, "balance cache unavailable, running store-only");
            Arc::new(NullCache)
        }
    }
}

fn execute<W: Write>(
    engine: &Engine,
    config: &Config,
    command: Command,
    out: &mut W,
) -> Result<(), CliError> {
    let currency = &config.currency;
    match command {
        Command::Balance { account } => {
            let id = resolve(engine, &account)?;
            let balance = engine.get_balance(id)?;
            writeln!(out, "{id}: {}", currency.format(balance))?;
        }
        Command::Deposit { account, amount } => {
            let id = resolve(engine, &account)?;
            let amount = currency.parse_amount(&amount)?;
            let account = engine.admin_deposit(id, amount, OPERATOR)?;
            writeln!(out, "{id}: {}", currency.format(account.balance))?;
        }
        Command::Withdraw { account, amount } => {
            let id = resolve(engine, &account)?;
            let amount = currency.parse_amount(&amount)?;
            let account = engine.admin_withdraw(id, amount, OPERATOR)?;
            writeln!(out, "{id}: {}", currency.format(account.balance))?;
        }
        Command::Pay { from, to, amount } => {
            let from = resolve(engine, &from)?;
            let to = resolve(engine, &to)?;
            let amount = currency.parse_amount(&amount)?;
            let receipt = engine.transfer(from, to, amount)?;
            writeln!(out, "{from}: {}", currency.format(receipt.source.balance))?;
            writeln!(out, "{to}: {}", currency.format(receipt.destination.balance))?;
        }
        Command::Set { account, amount } => {
            let id = resolve(engine, &account)?;
            let balance = currency.parse_balance(&amount)?;
            let account = engine.set_balance(id, balance, OPERATOR)?;
            writeln!(out, "{id}: {}", currency.format(account.balance))?;
        }
        Command::Freeze { account } => {
            let id = resolve(engine, &account)?;
            engine.freeze(id)?;
            writeln!(out, "{id}: frozen")?;
        }
        Command::Unfreeze { account } => {
            let id = resolve(engine, &account)?;
            engine.unfreeze(id)?;
            writeln!(out, "{id}: unfrozen")?;
        }
        Command::Rename { account, name } => {
            let id = resolve(engine, &account)?;
            engine.rename(id, &name)?;
            writeln!(out, "{id}: {name}")?;
        }
        Command::Top { limit } => {
            for (rank, account) in engine.top_accounts(limit)?.iter().enumerate() {
                let label = account.name.clone().unwrap_or_else(|| account.id.to_string());
                writeln!(out, "{}. {label} {}", rank + 1, currency.format(account.balance))?;
            }
        }
        Command::Export => write_accounts(&engine.accounts()?, currency, out)?,
        Command::Purge => match config.storage.transaction_retention_days {
            Some(days) => {
                let purged = engine.purge_journal(chrono::Duration::days(i64::from(days)))?;
                writeln!(out, "purged {purged} journal records older than {days} days")?;
            }
            None => writeln!(out, "retention disabled, nothing purged")?,
        },
    }
    Ok(())
}

/// Accepts either an account id or a display name.
fn resolve(engine: &Engine, input: &str) -> Result<AccountId, CliError> {
    if let Ok(id) = input.parse::<AccountId>() {
        return Ok(id);
    }
    engine
        .find_by_name(input)?
        .map(|account| account.id)
        .ok_or_else(|| CliError::UnknownAccount(input.to_string()))
}

/// One exported CSV row. Balances are in major units.
#[derive(Debug, Serialize)]
struct AccountRecord<'a> {
    id: AccountId,
    name: &'a str,
    balance: Decimal,
    revision: u64,
    frozen: bool,
}

/// Writes accounts as CSV.
///
/// # CSV Format
///
/// Columns: `id, name, balance, revision, frozen`
///
/// ```csv
/// id,name,balance,revision,frozen
/// 6f1c...,Steve,12.50,4,false
/// ```
fn write_accounts<W: Write>(
    accounts: &[Account],
    currency: &CurrencyConfig,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for account in accounts {
        wtr.serialize(AccountRecord {
            id: account.id,
            name: account.name.as_deref().unwrap_or(""),
            balance: currency.to_major(account.balance),
            revision: account.revision.0,
            frozen: account.frozen,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use economy_ledger::{InMemoryStore, LedgerConfig, SharedMemoryCache};

    fn engine() -> Engine {
        Engine::new(
            LedgerConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(SharedMemoryCache::new()),
        )
    }

    fn run_command(engine: &Engine, command: Command) -> String {
        let mut out = Vec::new();
        execute(engine, &Config::default(), command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn deposit_takes_major_units() {
        let engine = engine();
        let id = AccountId::random();
        let out = run_command(
            &engine,
            Command::Deposit {
                account: id.to_string(),
                amount: "12.5".into(),
            },
        );
        assert_eq!(out, format!("{id}: ♛12.50 crowns\n"));
        assert_eq!(engine.get_balance(id).unwrap(), 1250);
    }

    #[test]
    fn accounts_resolve_by_name() {
        let engine = engine();
        let id = AccountId::random();
        engine.rename(id, "Steve").unwrap();
        assert_eq!(resolve(&engine, "Steve").unwrap(), id);
        assert!(matches!(
            resolve(&engine, "Alex"),
            Err(CliError::UnknownAccount(_))
        ));
    }

    #[test]
    fn pay_prints_both_balances() {
        let engine = engine();
        let (a, b) = (AccountId::random(), AccountId::random());
        engine.deposit(a, 1000).unwrap();
        let out = run_command(
            &engine,
            Command::Pay {
                from: a.to_string(),
                to: b.to_string(),
                amount: "2.5".into(),
            },
        );
        assert_eq!(out, format!("{a}: ♛7.50 crowns\n{b}: ♛2.50 crowns\n"));
    }

    #[test]
    fn refused_withdrawal_is_an_error() {
        let engine = engine();
        let mut out = Vec::new();
        let result = execute(
            &engine,
            &Config::default(),
            Command::Withdraw {
                account: AccountId::random().to_string(),
                amount: "1".into(),
            },
            &mut out,
        );
        assert!(matches!(
            result,
            Err(CliError::Ledger(LedgerError::InsufficientFunds))
        ));
    }

    #[test]
    fn top_lists_names_in_order() {
        let engine = engine();
        let (a, b) = (AccountId::random(), AccountId::random());
        engine.deposit(a, 100).unwrap();
        engine.deposit(b, 300).unwrap();
        engine.rename(b, "Alex").unwrap();
        let out = run_command(&engine, Command::Top { limit: 5 });
        assert_eq!(out, format!("1. Alex ♛3.00 crowns\n2. {a} ♛1.00 crown\n"));
    }

    #[test]
    fn export_writes_major_units() {
        let engine = engine();
        let id = AccountId::random();
        engine.deposit(id, 150).unwrap();

        let mut output = Vec::new();
        write_accounts(&engine.accounts().unwrap(), &CurrencyConfig::default(), &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("id,name,balance,revision,frozen\n"));
        assert!(output.contains(&format!("{id},,1.50,2,false")));
    }
}
