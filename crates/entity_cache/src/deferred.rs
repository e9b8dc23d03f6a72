// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-resolution completion handles shared by any number of waiters.

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use futures_channel::oneshot;
use futures_util::future::{FutureExt, Shared};

use crate::Flushed;

/// Producer side of a pending result.
///
/// Settling consumes the handle, so a value is delivered at most once. Dropping an unsettled
/// handle fails every waiter with [`Flushed`].
pub(crate) struct Deferred<T> {
    sender: oneshot::Sender<T>,
    promise: Promise<T>,
}

impl<T: Clone> Deferred<T> {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender,
            promise: Promise(receiver.shared()),
        }
    }

    /// Returns a future observing this handle's outcome.
    pub(crate) fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    pub(crate) fn settle(self, value: T) {
        // `self.promise` keeps the receiver alive, so the send cannot fail.
        let _ = self.sender.send(value);
    }
}

impl<T> Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

/// Consumer side of a [`Deferred`]; cloneable, every clone observes the same outcome.
pub(crate) struct Promise<T>(Shared<oneshot::Receiver<T>>);

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T, Flushed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().0.poll_unpin(cx).map(|outcome| outcome.map_err(|_canceled| Flushed))
    }
}

impl<T> Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}
