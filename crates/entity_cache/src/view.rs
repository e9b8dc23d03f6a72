// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tokio::sync::watch;

/// An observable batch result for consumers that redraw when data arrives.
///
/// Created by [`EntityCache::watch_batch`](crate::EntityCache::watch_batch). The view starts
/// empty and receives the complete batch result once it settles.
#[derive(Debug, Clone)]
pub struct BatchView<V> {
    receiver: watch::Receiver<Option<Vec<Option<V>>>>,
}

impl<V: Clone> BatchView<V> {
    pub(crate) fn new(receiver: watch::Receiver<Option<Vec<Option<V>>>>) -> Self {
        Self { receiver }
    }

    /// Returns the latest result, empty while the batch is pending.
    #[must_use]
    pub fn current(&self) -> Vec<Option<V>> {
        self.receiver.borrow().clone().unwrap_or_default()
    }

    /// Returns `true` once the batch result has been published.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Waits until the batch result is published and returns it.
    ///
    /// Returns `None` if the batch was abandoned by a flush.
    pub async fn settled(&mut self) -> Option<Vec<Option<V>>> {
        let published = self.receiver.wait_for(Option::is_some).await.ok()?;
        published.clone()
    }
}
