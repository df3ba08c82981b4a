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

//! Error types for account operations.

use thiserror::Error;

/// Account operation errors.
///
/// Insufficient funds is deliberately absent: a withdrawal that cannot be
/// covered waits for deposits instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Deposit would exceed the representable decimal range
    #[error("balance overflow")]
    Overflow,

    /// Bounded withdrawal gave up before funds became available
    #[error("timed out waiting for sufficient funds")]
    Timeout,

    /// Cancellation token fired while the withdrawal was pending
    #[error("withdrawal cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::AccountError;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            AccountError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(AccountError::Overflow.to_string(), "balance overflow");
        assert_eq!(
            AccountError::Timeout.to_string(),
            "timed out waiting for sufficient funds"
        );
        assert_eq!(AccountError::Cancelled.to_string(), "withdrawal cancelled");
    }

    #[test]
    fn errors_are_cloneable() {
        let error = AccountError::Timeout;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
