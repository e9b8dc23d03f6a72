// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Releases any number of waiters once an expected number of completions is reported.
//!
//! A [`WaitGroup`] is created with the number of units of work a producer expects to complete.
//! Each completed unit is reported with [`WaitGroup::done`]. Once every unit has been reported,
//! all waiters are released. A producer that knows no further completions will ever arrive can
//! release everybody early with [`WaitGroup::finish`].
//!
//! # Example
//!
//! ```
//! use wait_group::WaitGroup;
//!
//! # futures::executor::block_on(async {
//! let group = WaitGroup::new(2);
//!
//! let worker = group.clone();
//! worker.done();
//! assert!(!group.is_released());
//!
//! worker.done();
//! group.wait().await;
//! assert!(group.is_released());
//! # });
//! ```
//!
//! # Thread Safety
//!
//! [`WaitGroup`] is `Send` and `Sync`. Clones share the same counter, so `done()` and `finish()`
//! can be called from independent tasks or threads while other tasks wait.

use std::{
    fmt::Debug,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

/// Counts outstanding units of work and releases waiters when none remain.
///
/// Cloning a `WaitGroup` is cheap; all clones observe and drive the same release.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<Mutex<State>>,
}

struct State {
    remaining: usize,
    released: bool,
    wakers: Vec<Waker>,
}

impl State {
    /// Marks the group released and hands back the wakers that must be notified.
    fn release(&mut self) -> Vec<Waker> {
        if self.released {
            return Vec::new();
        }
        self.released = true;
        std::mem::take(&mut self.wakers)
    }
}

impl WaitGroup {
    /// Creates a group expecting `expected` calls to [`done`](Self::done).
    ///
    /// A group expecting zero completions starts out released.
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                remaining: expected,
                released: expected == 0,
                wakers: Vec::new(),
            })),
        }
    }

    /// Reports one completed unit of work.
    ///
    /// When the last expected unit is reported, every current and future waiter is released.
    /// Reporting more units than expected is not expected to happen and is ignored.
    pub fn done(&self) {
        let wakers = {
            let mut state = self.inner.lock();
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 { state.release() } else { Vec::new() }
        };
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Releases every waiter now, regardless of how many units are still outstanding.
    pub fn finish(&self) {
        let wakers = self.inner.lock().release();
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Returns a future that completes once the group is released.
    ///
    /// If the group has already been released, the future is immediately ready.
    #[must_use]
    pub fn wait(&self) -> Wait {
        Wait {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the number of completions still expected.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner.lock().remaining
    }

    /// Returns `true` once the group has been released by [`done`](Self::done) or [`finish`](Self::finish).
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }
}

impl Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("WaitGroup")
            .field("remaining", &state.remaining)
            .field("released", &state.released)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`WaitGroup::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    inner: Arc<Mutex<State>>,
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.lock();
        if state.released {
            return Poll::Ready(());
        }

        // A waiter polled repeatedly with the same waker must not pile up registrations.
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl Debug for Wait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wait").finish_non_exhaustive()
    }
}
