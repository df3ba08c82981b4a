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

//! # Guarded Account
//!
//! This library provides a single shared balance that many threads can
//! deposit into and withdraw from. A withdrawal that cannot be covered does
//! not fail: it blocks until deposits make enough funds available.
//!
//! ## Core Components
//!
//! - [`Account`]: The guarded balance (mutex + condition variable monitor)
//! - [`CancellationToken`]: Wakes and fails a blocked withdrawal on demand
//! - [`AccountEvent`] / [`EventSink`]: Observable deposit, withdrawal and
//!   insufficient-funds notices
//! - [`AccountError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use guarded_account::Account;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let account = Arc::new(Account::new());
//!
//! // Blocks until the deposit below arrives.
//! let waiter = {
//!     let account = Arc::clone(&account);
//!     thread::spawn(move || account.withdraw(dec!(10)))
//! };
//!
//! account.deposit(dec!(25)).unwrap();
//! waiter.join().unwrap().unwrap();
//! assert_eq!(account.balance(), dec!(15));
//! ```
//!
//! ## Thread Safety
//!
//! Every operation takes the account lock. Deposits wake all blocked
//! withdrawals and each one re-checks whether it can now proceed, so a wake
//! never implies success. Use [`Fairness::Fifo`] to make competing
//! withdrawals complete in arrival order.

pub mod account;
mod cancel;
pub mod error;
pub mod event;

pub use account::{Account, AccountBuilder, Fairness};
pub use cancel::CancellationToken;
pub use error::AccountError;
pub use event::{AccountEvent, EventSink, MemorySink, NullSink, TracingSink};
