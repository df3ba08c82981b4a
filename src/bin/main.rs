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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use guarded_account::{Account, AccountError, Fairness};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Guarded Account - Replay concurrent deposit/withdraw scripts
///
/// Reads per-actor operations from a CSV file, runs every actor on its own
/// thread against one shared account and prints the final balance to stdout.
/// Withdrawals that cannot be covered wait for other actors' deposits.
#[derive(Parser, Debug)]
#[command(name = "guarded-account")]
#[command(about = "Replays concurrent deposit/withdraw scripts against one shared account", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: actor,op,amount
    /// Example: cargo run -- script.csv > balance.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Balance the account starts with
    #[arg(long, default_value = "0")]
    opening_balance: Decimal,

    /// Complete blocked withdrawals in arrival order
    #[arg(long)]
    fifo: bool,

    /// Give up on a withdrawal after this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let fairness = if args.fifo {
        Fairness::Fifo
    } else {
        Fairness::Barging
    };
    let account = match Account::builder()
        .opening_balance(args.opening_balance)
        .fairness(fairness)
        .build()
    {
        Ok(account) => account,
        Err(e) => {
            eprintln!("Invalid opening balance {}: {}", args.opening_balance, e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let timeout = args.timeout_ms.map(Duration::from_millis);
    let summary = match run_script(BufReader::new(file), &account, timeout) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error processing script: {}", e);
            process::exit(1);
        }
    };
    tracing::info!(
        completed = summary.completed,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "script finished"
    );

    if let Err(e) = write_balance(&account, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `actor, op, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    actor: String,
    op: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Deposit(Decimal),
    Withdraw(Decimal),
    Balance,
}

impl CsvRecord {
    /// Returns `None` for unknown operations or a missing amount.
    fn into_operation(self) -> Option<(String, Operation)> {
        let op = match self.op.to_lowercase().as_str() {
            "deposit" => Operation::Deposit(self.amount?),
            "withdraw" | "withdrawal" => Operation::Withdraw(self.amount?),
            "balance" => Operation::Balance,
            _ => return None,
        };
        Some((self.actor, op))
    }
}

/// Outcome counts of a script run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ScriptSummary {
    /// Operations that took effect.
    completed: usize,
    /// Operations the account refused (invalid amount, timeout).
    rejected: usize,
    /// Rows that could not be parsed into an operation.
    skipped: usize,
}

impl ScriptSummary {
    fn merge(&mut self, other: ScriptSummary) {
        self.completed += other.completed;
        self.rejected += other.rejected;
        self.skipped += other.skipped;
    }
}

/// Groups the script's rows by actor, keeping each actor's file order.
fn parse_script<R: Read>(
    reader: R,
) -> Result<(BTreeMap<String, Vec<Operation>>, usize), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // amount may be omitted for `balance`
        .has_headers(true)
        .from_reader(reader);

    let mut plan: BTreeMap<String, Vec<Operation>> = BTreeMap::new();
    let mut skipped = 0;

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => match record.into_operation() {
                Some((actor, op)) => plan.entry(actor).or_default().push(op),
                None => {
                    tracing::warn!("skipping invalid operation record");
                    skipped += 1;
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed row");
                skipped += 1;
            }
        }
    }

    Ok((plan, skipped))
}

/// Runs one actor's operations in order.
fn run_actor(
    account: &Account,
    actor: &str,
    ops: &[Operation],
    timeout: Option<Duration>,
) -> ScriptSummary {
    let mut summary = ScriptSummary::default();

    for op in ops {
        let result: Result<(), AccountError> = match *op {
            Operation::Deposit(amount) => account.deposit(amount),
            Operation::Withdraw(amount) => match timeout {
                Some(timeout) => account.withdraw_timeout(amount, timeout),
                None => account.withdraw(amount),
            },
            Operation::Balance => {
                tracing::info!(actor, balance = %account.balance(), "balance");
                Ok(())
            }
        };

        match result {
            Ok(()) => summary.completed += 1,
            Err(e) => {
                tracing::warn!(actor, ?op, error = %e, "operation rejected");
                summary.rejected += 1;
            }
        }
    }

    summary
}

/// Replays a CSV script against `account`, one thread per actor.
///
/// # CSV Format
///
/// Expected columns: `actor, op, amount`
/// - `actor`: Name of the thread that runs the row
/// - `op`: `deposit`, `withdraw` or `balance`
/// - `amount`: Decimal amount (omitted for `balance`)
///
/// # Example
///
/// ```csv
/// actor,op,amount
/// alice,withdraw,150
/// bob,deposit,100
/// bob,deposit,60
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails. Malformed rows and rejected
/// operations are logged and counted but don't stop processing.
fn run_script<R: Read>(
    reader: R,
    account: &Account,
    timeout: Option<Duration>,
) -> Result<ScriptSummary, csv::Error> {
    let (plan, skipped) = parse_script(reader)?;
    let mut summary = ScriptSummary {
        skipped,
        ..ScriptSummary::default()
    };

    let results = crossbeam::scope(|scope| {
        let handles: Vec<_> = plan
            .iter()
            .map(|(actor, ops)| scope.spawn(move |_| run_actor(account, actor, ops, timeout)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    });

    // A panicking actor is a bug in the account, not bad input.
    let results = match results {
        Ok(results) => results,
        Err(panic) => std::panic::resume_unwind(panic),
    };
    for result in results {
        match result {
            Ok(actor_summary) => summary.merge(actor_summary),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    Ok(summary)
}

/// Write the final balance as CSV, rounded to at most 4 decimal places.
///
/// ```csv
/// balance
/// 10.5
/// ```
fn write_balance<W: Write>(account: &Account, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    wtr.serialize(account)?;
    wtr.flush()?;
    Ok(())
}
