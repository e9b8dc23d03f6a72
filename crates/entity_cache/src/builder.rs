// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring an [`EntityCache`].

use std::{fmt::Debug, hash::Hash, sync::Arc};

use futures_util::future::FutureExt;

use crate::{
    EntityCache, Spawner,
    cache::{BulkFetchFn, CacheName, ErrorHandler, FetchAllFn, FetchFn, IdGetter},
};

const DEFAULT_NAME: CacheName = "entity_cache";

/// Builder for constructing an [`EntityCache`].
///
/// Created by calling [`EntityCache::builder`] with the two required pieces: a function
/// extracting an entity's identifier and a function fetching a single entity. Everything else
/// is optional.
///
/// # Examples
///
/// ```
/// use entity_cache::EntityCache;
///
/// #[derive(Clone)]
/// struct Item {
///     id: u64,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = EntityCache::builder(|item: &Item| item.id, |id: u64| async move { Ok::<_, String>(Some(Item { id })) })
///     .name("items")
///     .bulk_fetch(|ids: Vec<u64>| async move { Ok(ids.into_iter().map(|id| Item { id }).collect::<Vec<_>>()) })
///     .fetch_all(|| async { Ok(vec![Item { id: 1 }, Item { id: 2 }]) })
///     .error_handler(|e: &String| eprintln!("fetch failed: {e}"))
///     .build();
///
/// assert_eq!(cache.name(), "items");
/// # }
/// ```
pub struct EntityCacheBuilder<K, V, E> {
    name: CacheName,
    id_of: IdGetter<K, V>,
    fetch: FetchFn<K, V, E>,
    bulk_fetch: Option<BulkFetchFn<K, V, E>>,
    fetch_all: Option<FetchAllFn<V, E>>,
    error_handler: Option<ErrorHandler<E>>,
    spawner: Option<Spawner>,
    settle_batch_failures: bool,
}

impl<K, V, E> EntityCacheBuilder<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub(crate) fn new<G, F, Fut>(id_of: G, fetch: F) -> Self
    where
        G: Fn(&V) -> K + Send + Sync + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
    {
        Self {
            name: DEFAULT_NAME,
            id_of: Arc::new(id_of),
            fetch: Arc::new(move |id: K| fetch(id).boxed()),
            bulk_fetch: None,
            fetch_all: None,
            error_handler: None,
            spawner: None,
            settle_batch_failures: false,
        }
    }

    /// Sets the name used to identify this cache in log events.
    #[must_use]
    pub fn name(mut self, name: CacheName) -> Self {
        self.name = name;
        self
    }

    /// Sets a function fetching many entities in one call.
    ///
    /// When present, [`EntityCache::batch`] issues a single bulk fetch for all identifiers it
    /// has to load instead of fetching them one by one. The returned list may omit identifiers;
    /// those resolve as absent.
    #[must_use]
    pub fn bulk_fetch<F, Fut>(mut self, bulk_fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
    {
        self.bulk_fetch = Some(Arc::new(move |ids: Vec<K>| bulk_fetch(ids).boxed()));
        self
    }

    /// Sets a function fetching the complete entity set.
    ///
    /// Enables [`EntityCache::all`] to load every entity once, after which single lookups are
    /// served from storage.
    #[must_use]
    pub fn fetch_all<F, Fut>(mut self, fetch_all: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
    {
        self.fetch_all = Some(Arc::new(move || fetch_all().boxed()));
        self
    }

    /// Sets the initial error handler.
    ///
    /// The handler can be replaced later with [`EntityCache::set_error_handler`]. Without one,
    /// fetch errors are dropped silently.
    #[must_use]
    pub fn error_handler(mut self, handler: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the spawner fetches run on.
    ///
    /// Defaults to [`Spawner::new_tokio`] when the `tokio` feature is enabled.
    #[must_use]
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Resolves every identifier a batch registered as absent when its fetch step fails.
    ///
    /// By default a failed bulk fetch only notifies the error handler, and the requests the batch
    /// registered stay pending until [`EntityCache::flush`]. Enabling this settles them as
    /// absent instead, so neither the batch nor any concurrent `get` waits forever.
    #[must_use]
    pub fn settle_batch_failures(mut self, enabled: bool) -> Self {
        self.settle_batch_failures = enabled;
        self
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Panics if no spawner was configured and the `tokio` feature is disabled.
    #[must_use]
    pub fn build(self) -> EntityCache<K, V, E> {
        let spawner = self.spawner.unwrap_or_else(default_spawner);
        EntityCache::new(
            self.name,
            self.id_of,
            self.fetch,
            self.bulk_fetch,
            self.fetch_all,
            self.error_handler.unwrap_or_else(ignore_errors),
            spawner,
            self.settle_batch_failures,
        )
    }
}

fn ignore_errors<E: 'static>() -> ErrorHandler<E> {
    Arc::new(|_: &E| {})
}

#[cfg(feature = "tokio")]
fn default_spawner() -> Spawner {
    Spawner::new_tokio()
}

#[cfg(not(feature = "tokio"))]
#[expect(clippy::panic, reason = "misconfiguration detected at construction time")]
fn default_spawner() -> Spawner {
    panic!("a spawner must be configured when the `tokio` feature is disabled")
}

impl<K, V, E> Debug for EntityCacheBuilder<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCacheBuilder")
            .field("name", &self.name)
            .field("bulk_fetch", &self.bulk_fetch.is_some())
            .field("fetch_all", &self.fetch_all.is_some())
            .field("spawner", &self.spawner)
            .field("settle_batch_failures", &self.settle_batch_failures)
            .finish_non_exhaustive()
    }
}
