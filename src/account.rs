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

//! Guarded account.
//!
//! An [`Account`] is a monitor: one [`parking_lot::Mutex`] guards the balance
//! and one [`parking_lot::Condvar`] bound to it parks withdrawals that cannot
//! be covered yet. Every deposit broadcasts on the condition variable and each
//! woken withdrawal re-checks its own predicate.
//!
//! Each withdrawal call moves through:
//!
//! ```text
//! Requested ──► Blocked ⇄ Rechecking ──► Completed
//!                   │
//!                   └──(deadline / cancel)──► Timeout / Cancelled
//! ```
//!
//! # Example
//!
//! ```
//! use guarded_account::Account;
//! use rust_decimal_macros::dec;
//!
//! let account = Account::new();
//! account.deposit(dec!(100)).unwrap();
//! account.withdraw(dec!(40)).unwrap();
//! assert_eq!(account.balance(), dec!(60));
//! ```

use crate::cancel::{CancellationToken, Wake};
use crate::event::{AccountEvent, EventSink, TracingSink};
use crate::AccountError;
use parking_lot::{Condvar, Mutex};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// How competing blocked withdrawals are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fairness {
    /// Every deposit wakes every waiter and whichever re-acquires the lock
    /// first with enough funds wins. Large withdrawals may starve.
    #[default]
    Barging,
    /// Blocked withdrawals complete strictly in the order they started
    /// waiting. A withdrawal at the head of the queue holds back later ones
    /// even when those could be covered.
    Fifo,
}

#[derive(Debug)]
struct AccountState {
    balance: Decimal,
    /// Callers currently parked on the condition variable.
    waiting: usize,
    /// FIFO tickets of pending withdrawals, oldest first.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl AccountState {
    fn new(balance: Decimal) -> Self {
        Self {
            balance,
            waiting: 0,
            queue: VecDeque::new(),
            next_ticket: 0,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(ticket);
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        if let Some(pos) = self.queue.iter().position(|t| *t == ticket) {
            self.queue.remove(pos);
        }
    }

    /// Whether a withdrawal of `amount` holding `ticket` may be applied now.
    fn can_withdraw(&self, amount: Decimal, ticket: Option<u64>) -> bool {
        let turn = match ticket {
            Some(ticket) => self.queue.front() == Some(&ticket),
            None => true,
        };
        turn && self.balance >= amount
    }

    fn credit(&mut self, amount: Decimal) -> Result<(), AccountError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(AccountError::Overflow)?;
        self.assert_invariants();
        Ok(())
    }

    fn debit(&mut self, amount: Decimal) {
        self.balance -= amount;
        self.assert_invariants();
    }
}

/// The lock and its condition variable. Shared with cancellation tokens so
/// they can wake parked withdrawals.
struct Monitor {
    state: Mutex<AccountState>,
    funds: Condvar,
}

impl Wake for Monitor {
    fn wake(&self) {
        let _state = self.state.lock();
        self.funds.notify_all();
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), AccountError> {
    if amount <= Decimal::ZERO {
        return Err(AccountError::InvalidAmount);
    }
    Ok(())
}

/// A balance shared by many threads, with blocking withdrawals.
///
/// Share it by reference: `Arc<Account>` or a scoped borrow.
///
/// # Invariants
///
/// - The balance is only read or written with the lock held.
/// - The balance is never observably negative.
/// - Invalid amounts are rejected before the lock is taken.
pub struct Account {
    monitor: Arc<Monitor>,
    sink: Arc<dyn EventSink>,
    fairness: Fairness,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 4;

    /// Creates an account with a zero balance that logs through `tracing`.
    pub fn new() -> Self {
        Self::from_parts(Decimal::ZERO, Fairness::default(), Arc::new(TracingSink))
    }

    /// Creates an account holding `opening` funds.
    ///
    /// # Errors
    ///
    /// [`AccountError::InvalidAmount`] if `opening` is negative.
    pub fn with_balance(opening: Decimal) -> Result<Self, AccountError> {
        Self::builder().opening_balance(opening).build()
    }

    pub fn builder() -> AccountBuilder {
        AccountBuilder::default()
    }

    fn from_parts(balance: Decimal, fairness: Fairness, sink: Arc<dyn EventSink>) -> Self {
        Self {
            monitor: Arc::new(Monitor {
                state: Mutex::new(AccountState::new(balance)),
                funds: Condvar::new(),
            }),
            sink,
            fairness,
        }
    }

    /// Snapshot of the balance at some instant during the call.
    pub fn balance(&self) -> Decimal {
        self.monitor.state.lock().balance
    }

    pub fn fairness(&self) -> Fairness {
        self.fairness
    }

    /// Number of callers currently blocked waiting for funds.
    pub fn waiting(&self) -> usize {
        self.monitor.state.lock().waiting
    }

    /// Adds `amount` and wakes every blocked withdrawal.
    ///
    /// # Errors
    ///
    /// - [`AccountError::InvalidAmount`] if `amount` is not strictly positive.
    /// - [`AccountError::Overflow`] if the new balance is not representable.
    pub fn deposit(&self, amount: Decimal) -> Result<(), AccountError> {
        ensure_positive(amount)?;

        let mut state = self.monitor.state.lock();
        state.credit(amount)?;
        self.sink.emit(&AccountEvent::Deposited {
            amount,
            balance: state.balance,
        });
        self.monitor.funds.notify_all();
        Ok(())
    }

    /// Removes `amount`, blocking for as long as it takes funds to arrive.
    ///
    /// # Errors
    ///
    /// [`AccountError::InvalidAmount`] if `amount` is not strictly positive.
    pub fn withdraw(&self, amount: Decimal) -> Result<(), AccountError> {
        self.withdraw_inner(amount, None, None)
    }

    /// Like [`withdraw`](Self::withdraw) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// - [`AccountError::InvalidAmount`] if `amount` is not strictly positive.
    /// - [`AccountError::Timeout`] if funds did not arrive in time. The balance
    ///   is left untouched.
    pub fn withdraw_timeout(&self, amount: Decimal, timeout: Duration) -> Result<(), AccountError> {
        // A deadline beyond what Instant can represent is no deadline.
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.withdraw_inner(amount, Some(deadline), None),
            None => self.withdraw_inner(amount, None, None),
        }
    }

    /// Like [`withdraw`](Self::withdraw) but gives up at `deadline`.
    pub fn withdraw_deadline(&self, amount: Decimal, deadline: Instant) -> Result<(), AccountError> {
        self.withdraw_inner(amount, Some(deadline), None)
    }

    /// Like [`withdraw`](Self::withdraw) but fails with
    /// [`AccountError::Cancelled`] once `token` is cancelled.
    ///
    /// A token that is already cancelled fails the call without touching the
    /// balance, even if funds are sufficient.
    pub fn withdraw_cancellable(
        &self,
        amount: Decimal,
        token: &CancellationToken,
    ) -> Result<(), AccountError> {
        self.withdraw_inner(amount, None, Some(token))
    }

    /// Withdraws `amount` only if it can be done without waiting.
    ///
    /// Returns `Ok(false)` when funds are short or, under
    /// [`Fairness::Fifo`], when other withdrawals are already queued.
    pub fn try_withdraw(&self, amount: Decimal) -> Result<bool, AccountError> {
        ensure_positive(amount)?;

        let mut state = self.monitor.state.lock();
        if self.fairness == Fairness::Fifo && !state.queue.is_empty() {
            return Ok(false);
        }
        if state.balance < amount {
            return Ok(false);
        }
        state.debit(amount);
        self.sink.emit(&AccountEvent::Withdrew {
            amount,
            balance: state.balance,
        });
        Ok(true)
    }

    fn withdraw_inner(
        &self,
        amount: Decimal,
        deadline: Option<Instant>,
        token: Option<&CancellationToken>,
    ) -> Result<(), AccountError> {
        ensure_positive(amount)?;

        // Token lock and account lock are never nested.
        let _watch = token.map(|token| token.watch(self.waker()));

        let mut state = self.monitor.state.lock();
        let ticket = match self.fairness {
            Fairness::Fifo => Some(state.enqueue()),
            Fairness::Barging => None,
        };

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                self.abandon(&mut state, ticket);
                return Err(AccountError::Cancelled);
            }
            if state.can_withdraw(amount, ticket) {
                break;
            }
            if state.balance < amount {
                self.sink.emit(&AccountEvent::InsufficientFunds {
                    requested: amount,
                    balance: state.balance,
                });
            }

            state.waiting += 1;
            let timed_out = match deadline {
                Some(deadline) => self.monitor.funds.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.monitor.funds.wait(&mut state);
                    false
                }
            };
            state.waiting -= 1;

            if timed_out && !state.can_withdraw(amount, ticket) {
                self.abandon(&mut state, ticket);
                return Err(AccountError::Timeout);
            }
        }

        state.debit(amount);
        if let Some(ticket) = ticket {
            state.dequeue(ticket);
            // The next head may be coverable by what is left.
            self.monitor.funds.notify_all();
        }
        self.sink.emit(&AccountEvent::Withdrew {
            amount,
            balance: state.balance,
        });
        Ok(())
    }

    /// Leaves the FIFO queue without withdrawing.
    fn abandon(&self, state: &mut AccountState, ticket: Option<u64>) {
        if let Some(ticket) = ticket {
            state.dequeue(ticket);
            self.monitor.funds.notify_all();
        }
    }

    fn waker(&self) -> Weak<dyn Wake> {
        let monitor: Arc<dyn Wake> = self.monitor.clone();
        Arc::downgrade(&monitor)
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.monitor.state.lock();
        f.debug_struct("Account")
            .field("balance", &state.balance)
            .field("waiting", &state.waiting)
            .field("fairness", &self.fairness)
            .finish_non_exhaustive()
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let balance = self.balance();
        let mut state = serializer.serialize_struct("Account", 1)?;
        state.serialize_field("balance", &balance.round_dp(Account::DECIMAL_PRECISION))?;
        state.end()
    }
}

/// Configures an [`Account`] before it is shared.
pub struct AccountBuilder {
    opening_balance: Decimal,
    fairness: Fairness,
    sink: Arc<dyn EventSink>,
}

impl Default for AccountBuilder {
    fn default() -> Self {
        Self {
            opening_balance: Decimal::ZERO,
            fairness: Fairness::default(),
            sink: Arc::new(TracingSink),
        }
    }
}

impl AccountBuilder {
    pub fn opening_balance(mut self, balance: Decimal) -> Self {
        self.opening_balance = balance;
        self
    }

    pub fn fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    /// Where events go. Defaults to [`TracingSink`].
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// # Errors
    ///
    /// [`AccountError::InvalidAmount`] if the opening balance is negative.
    pub fn build(self) -> Result<Account, AccountError> {
        if self.opening_balance < Decimal::ZERO {
            return Err(AccountError::InvalidAmount);
        }
        Ok(Account::from_parts(
            self.opening_balance,
            self.fairness,
            self.sink,
        ))
    }
}
