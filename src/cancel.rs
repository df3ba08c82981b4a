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

//! Cancellation for blocked withdrawals.
//!
//! A [`CancellationToken`] is shared between the thread that may give up on a
//! withdrawal and the thread blocked inside
//! [`Account::withdraw_cancellable`](crate::Account::withdraw_cancellable).
//! Cancelling wakes every account that currently has a caller parked on the
//! token, so the waiter notices without polling.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Something that can be woken when a token is cancelled.
///
/// Implementors must take the same lock their waiters re-check under before
/// notifying, otherwise a wake can slip in between the waiter's check and its
/// wait.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    watchers: Mutex<Vec<Weak<dyn Wake>>>,
}

/// Cloneable cancellation flag. All clones observe the same state.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every watcher. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake outside the watcher lock; waking takes account locks.
        let watchers: Vec<_> = self
            .inner
            .watchers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        tracing::debug!(watchers = watchers.len(), "cancellation token fired");
        for watcher in watchers {
            watcher.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers `waker` until the returned guard is dropped.
    pub(crate) fn watch(&self, waker: Weak<dyn Wake>) -> WatchGuard<'_> {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|w| w.strong_count() > 0);
        watchers.push(waker.clone());
        WatchGuard { token: self, waker }
    }

    fn unwatch(&self, waker: &Weak<dyn Wake>) {
        let mut watchers = self.inner.watchers.lock();
        if let Some(pos) = watchers.iter().position(|w| Weak::ptr_eq(w, waker)) {
            watchers.swap_remove(pos);
        }
    }

    #[cfg(test)]
    fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Deregisters a watcher on drop.
pub(crate) struct WatchGuard<'a> {
    token: &'a CancellationToken,
    waker: Weak<dyn Wake>,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.token.unwatch(&self.waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl Wake for CountingWaker {
        fn wake(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn weak(waker: &Arc<CountingWaker>) -> Weak<dyn Wake> {
        let waker: Arc<dyn Wake> = waker.clone();
        Arc::downgrade(&waker)
    }

    #[test]
    fn new_token_is_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_wakes_watchers_once() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker::default());
        let _guard = token.watch(weak(&waker));

        token.cancel();
        token.cancel();

        assert_eq!(waker.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_guard_stops_watching() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker::default());
        {
            let _guard = token.watch(weak(&waker));
            assert_eq!(token.watcher_count(), 1);
        }
        assert_eq!(token.watcher_count(), 0);

        token.cancel();
        assert_eq!(waker.wakes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dead_watchers_are_skipped() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker::default());
        let guard = token.watch(weak(&waker));
        drop(waker);

        // Upgrade fails, nothing to wake, no panic.
        token.cancel();
        drop(guard);
        assert_eq!(token.watcher_count(), 0);
    }
}
