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

//! Observable account events and the sinks that receive them.
//!
//! Every balance change (and every time a withdrawal has to wait) produces an
//! [`AccountEvent`]. The account hands it to an [`EventSink`] while still
//! holding its lock, so sinks see events in the same total order as the
//! balance mutations.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::fmt;

/// Something observable that happened to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEvent {
    /// Funds were added. `balance` is the balance after the deposit.
    Deposited { amount: Decimal, balance: Decimal },
    /// A withdrawal could not be covered and is about to wait.
    InsufficientFunds { requested: Decimal, balance: Decimal },
    /// Funds were removed. `balance` is what remains.
    Withdrew { amount: Decimal, balance: Decimal },
}

impl fmt::Display for AccountEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposited { amount, balance } => {
                write!(f, "deposit {}, balance {}", amount, balance)
            }
            Self::InsufficientFunds { requested, balance } => write!(
                f,
                "insufficient funds for withdrawal {}, balance {}",
                requested, balance
            ),
            Self::Withdrew { amount, balance } => {
                write!(f, "withdrawal {}, balance {}", amount, balance)
            }
        }
    }
}

/// Destination for account events.
///
/// Called with the account lock held: implementations must return quickly,
/// have no way to fail the operation that produced the event, and must not
/// call back into the account (or cancel a token one of its waiters watches).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AccountEvent);
}

/// Forwards events to `tracing`. This is the default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AccountEvent) {
        match *event {
            AccountEvent::Deposited { amount, balance } => {
                tracing::info!(%amount, %balance, "{}", event);
            }
            AccountEvent::InsufficientFunds { requested, balance } => {
                tracing::debug!(%requested, %balance, "{}", event);
            }
            AccountEvent::Withdrew { amount, balance } => {
                tracing::info!(%amount, %balance, "{}", event);
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &AccountEvent) {}
}

/// Records events in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AccountEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AccountEvent> {
        self.events.lock().clone()
    }

    /// Recorded events rendered with their `Display` form.
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &AccountEvent) {
        self.events.lock().push(*event);
    }
}
