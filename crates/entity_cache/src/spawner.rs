// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`Spawner`] for running fetches independently of the callers awaiting them.

use std::{fmt::Debug, pin::Pin, sync::Arc};

pub(crate) type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type SpawnFn = dyn Fn(BoxedFuture) + Send + Sync;

/// Runtime-agnostic, fire-and-forget task spawner.
///
/// The cache dispatches every fetch through its spawner so that a fetch keeps running even if
/// the caller that triggered it stops polling. Use [`Spawner::new_tokio`] on Tokio, or
/// [`Spawner::new_custom`] to plug in any other runtime.
///
/// # Examples
///
/// ```rust
/// use entity_cache::Spawner;
///
/// let spawner = Spawner::new_custom(|fut| {
///     std::thread::spawn(move || futures::executor::block_on(fut));
/// });
/// # let _ = spawner;
/// ```
#[derive(Clone)]
pub struct Spawner(SpawnerKind);

#[derive(Clone)]
enum SpawnerKind {
    #[cfg(feature = "tokio")]
    Tokio,
    Custom(Arc<SpawnFn>),
}

impl Spawner {
    /// Creates a spawner that uses the Tokio runtime.
    ///
    /// # Panics
    ///
    /// Spawning panics if it happens outside of a Tokio runtime context.
    #[must_use]
    #[cfg(feature = "tokio")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    pub fn new_tokio() -> Self {
        Self(SpawnerKind::Tokio)
    }

    /// Creates a custom spawner from a closure.
    ///
    /// The closure receives a boxed, pinned future and is responsible for driving it to
    /// completion on the appropriate runtime.
    pub fn new_custom<F>(f: F) -> Self
    where
        F: Fn(BoxedFuture) + Send + Sync + 'static,
    {
        Self(SpawnerKind::Custom(Arc::new(f)))
    }

    /// Spawns `work` and detaches from it.
    pub(crate) fn spawn(&self, work: impl Future<Output = ()> + Send + 'static) {
        match &self.0 {
            #[cfg(feature = "tokio")]
            SpawnerKind::Tokio => {
                drop(::tokio::spawn(work));
            }
            SpawnerKind::Custom(f) => f(Box::pin(work)),
        }
    }
}

#[cfg(feature = "tokio")]
impl Default for Spawner {
    fn default() -> Self {
        Self::new_tokio()
    }
}

impl Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            #[cfg(feature = "tokio")]
            SpawnerKind::Tokio => f.write_str("Spawner::Tokio"),
            SpawnerKind::Custom(_) => f.write_str("Spawner::Custom"),
        }
    }
}
