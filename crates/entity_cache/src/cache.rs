// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The entity cache: memoized storage, in-flight coalescing, batching and fetch-all.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
    sync::Arc,
};

use futures_channel::oneshot;
use futures_util::{
    StreamExt,
    future::{self, BoxFuture, Either},
    stream::FuturesUnordered,
};
use parking_lot::{Mutex, RwLock};
#[cfg(feature = "tokio")]
use tokio::sync::watch;
use wait_group::WaitGroup;

#[cfg(feature = "tokio")]
use crate::BatchView;
use crate::{
    AllError, EntityCacheBuilder, Flushed, Spawner,
    deferred::{Deferred, Promise},
    telemetry::{self, Activity, Operation},
};

/// Type alias for cache names used in log events.
pub type CacheName = &'static str;

pub(crate) type IdGetter<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;
pub(crate) type FetchFn<K, V, E> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<Option<V>, E>> + Send + Sync>;
pub(crate) type BulkFetchFn<K, V, E> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<V>, E>> + Send + Sync>;
pub(crate) type FetchAllFn<V, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<V>, E>> + Send + Sync>;
pub(crate) type ErrorHandler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A request-coalescing cache of entities identified by keys derived from the entities
/// themselves.
///
/// The cache owns three pieces of state:
///
/// - **storage**: every entity fetched or added so far, keyed by identifier
/// - **in-flight table**: one pending completion handle per identifier currently being fetched
/// - **fetch-all state**: whether the complete entity set is loaded or being loaded
///
/// Every request is registered in the in-flight table before the call returns its future, so a
/// request arriving a moment later for the same identifier joins the pending fetch instead of
/// starting another one. Fetches run on the cache's [`Spawner`] and keep running even if the
/// caller that started them drops its future.
///
/// `EntityCache` is cheap to clone; clones share the same state, which makes it suitable for
/// handing one instance to every consumer of a scope.
///
/// # Examples
///
/// ```
/// use entity_cache::EntityCache;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Post {
///     id: u64,
///     title: String,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = EntityCache::builder(
///     |post: &Post| post.id,
///     |id: u64| async move { Ok::<_, std::io::Error>(Some(Post { id, title: format!("post {id}") })) },
/// )
/// .build();
///
/// cache.add(Post { id: 7, title: "pinned".into() });
///
/// let post = cache.get(7).await.unwrap();
/// assert_eq!(post.unwrap().title, "pinned");
/// # }
/// ```
pub struct EntityCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for EntityCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K, V, E> {
    name: CacheName,
    id_of: IdGetter<K, V>,
    fetch: FetchFn<K, V, E>,
    bulk_fetch: Option<BulkFetchFn<K, V, E>>,
    fetch_all: Option<FetchAllFn<V, E>>,
    error_handler: RwLock<ErrorHandler<E>>,
    spawner: Spawner,
    settle_batch_failures: bool,
    state: Mutex<State<K, V>>,
}

struct State<K, V> {
    storage: HashMap<K, V>,
    in_flight: HashMap<K, Deferred<Option<V>>>,
    fetching_all: Option<Deferred<()>>,
    all_fetched: bool,
    /// Advanced by every flush; completions carrying an older generation are discarded.
    generation: u64,
}

/// A pending handle taken out of the in-flight table together with the value to settle it with.
type Settlement<V> = (Deferred<Option<V>>, Option<V>);

impl<K, V> State<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Stores a present item and detaches the pending handle for `id`, if any.
    ///
    /// The caller settles the returned handle once the state lock is released.
    fn resolve(&mut self, id: K, item: Option<V>) -> Option<Settlement<V>> {
        let pending = self.in_flight.remove(&id);
        match item {
            Some(item) => {
                let settlement = pending.map(|pending| (pending, Some(item.clone())));
                self.storage.insert(id, item);
                settlement
            }
            None => pending.map(|pending| (pending, None)),
        }
    }
}

/// How a `get` is going to be answered, decided while holding the state lock.
enum Lookup<K, V> {
    Ready(Option<V>),
    Pending(Promise<Option<V>>),
    AfterFetchAll(Promise<()>, K),
}

/// How an `all` call relates to the fetch-all operation.
enum FetchAllRun<E> {
    /// No fetch-all is needed: it is unavailable or already completed.
    Idle,
    /// This call started the fetch-all and receives its outcome.
    ///
    /// `fetching_all` fails as soon as a flush abandons the fetch-all, while `outcome` only
    /// arrives once the fetch itself finishes.
    Started {
        fetching_all: Promise<()>,
        outcome: oneshot::Receiver<Result<(), AllError<E>>>,
    },
    /// Another call started the fetch-all; wait for it to settle.
    Waiting(Promise<()>),
}

/// Results gathered by one `batch` call.
struct Collected<V> {
    items: Vec<Option<V>>,
    flushed: bool,
}

impl EntityCache<(), (), ()> {
    /// Creates a new cache builder.
    ///
    /// `id_of` extracts an entity's identifier and must be pure and deterministic. `fetch` loads a
    /// single entity; returning `Ok(None)` marks the identifier as absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use entity_cache::EntityCache;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let cache = EntityCache::builder(|s: &String| s.len(), |len: usize| async move { Ok::<_, ()>(Some("x".repeat(len))) })
    ///     .name("strings")
    ///     .build();
    ///
    /// assert_eq!(cache.get(3).await.unwrap().as_deref(), Some("xxx"));
    /// # }
    /// ```
    pub fn builder<K, V, E, G, F, Fut>(id_of: G, fetch: F) -> EntityCacheBuilder<K, V, E>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Send + 'static,
        G: Fn(&V) -> K + Send + Sync + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
    {
        EntityCacheBuilder::new(id_of, fetch)
    }
}

impl<K, V, E> EntityCache<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    #[expect(clippy::too_many_arguments, reason = "assembled by the builder only")]
    pub(crate) fn new(
        name: CacheName,
        id_of: IdGetter<K, V>,
        fetch: FetchFn<K, V, E>,
        bulk_fetch: Option<BulkFetchFn<K, V, E>>,
        fetch_all: Option<FetchAllFn<V, E>>,
        error_handler: ErrorHandler<E>,
        spawner: Spawner,
        settle_batch_failures: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                id_of,
                fetch,
                bulk_fetch,
                fetch_all,
                error_handler: RwLock::new(error_handler),
                spawner,
                settle_batch_failures,
                state: Mutex::new(State {
                    storage: HashMap::new(),
                    in_flight: HashMap::new(),
                    fetching_all: None,
                    all_fetched: false,
                    generation: 0,
                }),
            }),
        }
    }

    /// Inserts `item` into storage, completing any pending request for its identifier.
    pub fn add(&self, item: V) {
        let id = (self.inner.id_of)(&item);
        let settlement = self.inner.state.lock().resolve(id, Some(item));
        if let Some((pending, item)) = settlement {
            pending.settle(item);
        }
    }

    /// Retrieves the entity identified by `id`.
    ///
    /// In order of precedence:
    ///
    /// 1. While a fetch-all is running, waits for it and answers from storage afterwards.
    /// 2. A stored entity is returned immediately.
    /// 3. A request already in flight for `id` is joined; no second fetch is issued.
    /// 4. Otherwise a fetch is dispatched.
    ///
    /// A failed fetch is passed to the error handler and resolves as `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`Flushed`] if [`flush`](Self::flush) ran while the request was pending.
    pub fn get(&self, id: K) -> impl Future<Output = Result<Option<V>, Flushed>> + Send + 'static + use<K, V, E> {
        let lookup = self.inner.lookup(id);
        let inner = Arc::clone(&self.inner);
        async move {
            match lookup {
                Lookup::Ready(item) => Ok(item),
                Lookup::Pending(promise) => promise.await,
                Lookup::AfterFetchAll(promise, id) => {
                    promise.await?;
                    Ok(inner.state.lock().storage.get(&id).cloned())
                }
            }
        }
    }

    /// Retrieves many entities, coalescing everything that has to be loaded into one fetch.
    ///
    /// Stored entities are answered directly and identifiers already in flight are joined. The
    /// remaining distinct identifiers are loaded with a single bulk fetch when one is
    /// configured, or with concurrent single fetches otherwise. Identifiers the source does not
    /// return resolve as absent.
    ///
    /// The result holds one slot per requested identifier, `None` for absent ones, in the order
    /// the requests completed rather than the order of `ids`.
    ///
    /// If the fetch step fails, the error handler is notified and the identifiers this call
    /// registered stay pending, which keeps the returned future pending too, unless
    /// [`settle_batch_failures`](EntityCacheBuilder::settle_batch_failures) is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Flushed`] if [`flush`](Self::flush) ran while the request was pending.
    pub fn batch<I>(&self, ids: I) -> impl Future<Output = Result<Vec<Option<V>>, Flushed>> + Send + 'static + use<K, V, E, I>
    where
        I: IntoIterator<Item = K>,
    {
        let ids: Vec<K> = ids.into_iter().collect();
        let fetching_all = self.inner.state.lock().fetching_all.as_ref().map(Deferred::promise);
        match fetching_all {
            None => Either::Left(self.inner.start_batch(ids)),
            Some(fetching_all) => {
                let inner = Arc::clone(&self.inner);
                Either::Right(async move {
                    fetching_all.await?;
                    inner.start_batch(ids).await
                })
            }
        }
    }

    /// Retrieves every entity.
    ///
    /// The first call on a cache configured with a fetch-all function loads the complete entity
    /// set; later calls, and calls made while it is loading, reuse it. The result contains every
    /// stored entity plus the outcome of every request in flight, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`AllError::Fetch`] if the fetch-all started by this call failed; the next call
    /// retries it. Returns [`AllError::Flushed`] if [`flush`](Self::flush) ran while waiting.
    pub fn all(&self) -> impl Future<Output = Result<Vec<V>, AllError<E>>> + Send + 'static + use<K, V, E> {
        let run = self.inner.start_fetch_all();
        let inner = Arc::clone(&self.inner);
        async move {
            match run {
                FetchAllRun::Idle => {}
                FetchAllRun::Started { fetching_all, outcome } => {
                    fetching_all.await?;
                    outcome.await.unwrap_or(Err(AllError::Flushed(Flushed)))?;
                }
                FetchAllRun::Waiting(fetching_all) => fetching_all.await?,
            }

            let (mut items, pending): (Vec<V>, Vec<_>) = {
                let state = inner.state.lock();
                (
                    state.storage.values().cloned().collect(),
                    state.in_flight.values().map(Deferred::promise).collect(),
                )
            };
            items.extend(future::try_join_all(pending).await?.into_iter().flatten());

            let mut seen = HashSet::with_capacity(items.len());
            items.retain(|item| seen.insert((inner.id_of)(item)));
            Ok::<_, AllError<E>>(items)
        }
    }

    /// Drops all stored entities and abandons every pending request.
    ///
    /// Pending `get`, `batch` and `all` futures complete with [`Flushed`]. Fetches already
    /// dispatched keep running, but their results are discarded.
    pub fn flush(&self) {
        let (in_flight, fetching_all) = {
            let mut state = self.inner.state.lock();
            state.generation = state.generation.wrapping_add(1);
            state.storage.clear();
            state.all_fetched = false;
            (std::mem::take(&mut state.in_flight), state.fetching_all.take())
        };

        let abandoned = in_flight.len() + usize::from(fetching_all.is_some());
        telemetry::emit(self.inner.name, Operation::Flush, Activity::Flushed, abandoned);

        // Dropping the handles fails their waiters.
        drop(in_flight);
        drop(fetching_all);
    }

    /// Replaces the handler receiving every fetch error.
    pub fn set_error_handler(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        *self.inner.error_handler.write() = Arc::new(handler);
    }

    /// Starts a batch and returns a view that is empty until the batch settles.
    ///
    /// This is the hook for reactive consumers: render [`BatchView::current`] right away and
    /// re-render when [`BatchView::settled`] completes. A batch abandoned by a flush leaves the
    /// view empty.
    #[cfg(feature = "tokio")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    pub fn watch_batch(&self, ids: impl IntoIterator<Item = K>) -> BatchView<V> {
        let (sender, receiver) = watch::channel(None);
        let batch = self.batch(ids);
        self.inner.spawner.spawn(async move {
            if let Ok(items) = batch.await {
                sender.send_replace(Some(items));
            }
        });
        BatchView::new(receiver)
    }

    /// Returns the name of this cache for log identification.
    #[must_use]
    pub fn name(&self) -> CacheName {
        self.inner.name
    }

    /// Returns the number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().storage.len()
    }

    /// Returns `true` if no entity is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().storage.is_empty()
    }

    /// Returns `true` if an entity with identifier `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.inner.state.lock().storage.contains_key(id)
    }

    /// Returns the number of identifiers currently being fetched.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Returns `true` once a fetch-all has completed and no flush happened since.
    #[must_use]
    pub fn is_all_fetched(&self) -> bool {
        self.inner.state.lock().all_fetched
    }
}

impl<K, V, E> Inner<K, V, E>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// The single choke point every fetch completion goes through.
    fn resolve(&self, generation: u64, id: K, item: Option<V>) {
        let settlement = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.resolve(id, item)
        };
        if let Some((pending, item)) = settlement {
            pending.settle(item);
        }
    }

    fn report(&self, operation: Operation, error: &E) {
        telemetry::emit(self.name, operation, Activity::Failed, 1);
        let handler = Arc::clone(&*self.error_handler.read());
        handler(error);
    }

    fn lookup(self: &Arc<Self>, id: K) -> Lookup<K, V> {
        let mut state = self.state.lock();
        if let Some(fetching_all) = &state.fetching_all {
            return Lookup::AfterFetchAll(fetching_all.promise(), id);
        }
        if let Some(item) = state.storage.get(&id) {
            return Lookup::Ready(Some(item.clone()));
        }
        if let Some(pending) = state.in_flight.get(&id) {
            return Lookup::Pending(pending.promise());
        }

        let pending = Deferred::new();
        let promise = pending.promise();
        state.in_flight.insert(id.clone(), pending);
        let generation = state.generation;
        drop(state);

        self.spawn_fetch(generation, id);
        Lookup::Pending(promise)
    }

    fn spawn_fetch(self: &Arc<Self>, generation: u64, id: K) {
        telemetry::emit(self.name, Operation::Get, Activity::Fetch, 1);
        let request = (self.fetch)(id.clone());
        let inner = Arc::clone(self);
        self.spawner.spawn(async move {
            let item = match request.await {
                Ok(item) => item,
                Err(e) => {
                    inner.report(Operation::Get, &e);
                    None
                }
            };
            inner.resolve(generation, id, item);
        });
    }

    fn start_batch(self: &Arc<Self>, ids: Vec<K>) -> impl Future<Output = Result<Vec<Option<V>>, Flushed>> + Send + 'static + use<K, V, E> {
        let group = WaitGroup::new(ids.len());
        let collected = Arc::new(Mutex::new(Collected {
            items: Vec::with_capacity(ids.len()),
            flushed: false,
        }));

        let mut waiting = Vec::new();
        let mut to_fetch = Vec::new();
        let generation = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for id in ids {
                if let Some(item) = state.storage.get(&id) {
                    collected.lock().items.push(Some(item.clone()));
                    group.done();
                } else if let Some(pending) = state.in_flight.get(&id) {
                    waiting.push(pending.promise());
                } else {
                    // Registered right away so a repeated id later in `ids` joins this entry.
                    let pending = Deferred::new();
                    waiting.push(pending.promise());
                    state.in_flight.insert(id.clone(), pending);
                    to_fetch.push(id);
                }
            }
            state.generation
        };

        if !waiting.is_empty() {
            let recorders: FuturesUnordered<_> = waiting
                .into_iter()
                .map(|promise| {
                    let collected = Arc::clone(&collected);
                    let group = group.clone();
                    async move {
                        match promise.await {
                            Ok(item) => {
                                collected.lock().items.push(item);
                                group.done();
                            }
                            Err(Flushed) => {
                                collected.lock().flushed = true;
                                group.finish();
                            }
                        }
                    }
                })
                .collect();

            let fetch = (!to_fetch.is_empty()).then(|| Arc::clone(self).fetch_batch(generation, to_fetch));
            self.spawner.spawn(async move {
                let fetch = async {
                    if let Some(fetch) = fetch {
                        fetch.await;
                    }
                };
                future::join(recorders.collect::<()>(), fetch).await;
            });
        }

        async move {
            group.wait().await;
            let mut collected = collected.lock();
            if collected.flushed {
                Err(Flushed)
            } else {
                Ok(std::mem::take(&mut collected.items))
            }
        }
    }

    async fn fetch_batch(self: Arc<Self>, generation: u64, ids: Vec<K>) {
        telemetry::emit(self.name, Operation::Batch, Activity::Fetch, ids.len());
        let request: BoxFuture<'static, Result<Vec<V>, E>> = match &self.bulk_fetch {
            Some(bulk_fetch) => bulk_fetch(ids.clone()),
            None => {
                let singles: Vec<_> = ids.iter().cloned().map(|id| (self.fetch)(id)).collect();
                Box::pin(async move {
                    let items = future::try_join_all(singles).await?;
                    Ok::<_, E>(items.into_iter().flatten().collect())
                })
            }
        };

        match request.await {
            Ok(items) => {
                let mut returned = HashSet::with_capacity(items.len());
                for item in items {
                    let id = (self.id_of)(&item);
                    returned.insert(id.clone());
                    self.resolve(generation, id, Some(item));
                }

                let absent: Vec<K> = ids.into_iter().filter(|id| !returned.contains(id)).collect();
                if !absent.is_empty() {
                    telemetry::emit(self.name, Operation::Batch, Activity::Absent, absent.len());
                }
                for id in absent {
                    self.resolve(generation, id, None);
                }
            }
            Err(e) => {
                self.report(Operation::Batch, &e);
                if self.settle_batch_failures {
                    for id in ids {
                        self.resolve(generation, id, None);
                    }
                }
            }
        }
    }

    fn start_fetch_all(self: &Arc<Self>) -> FetchAllRun<E> {
        let Some(fetch_all) = &self.fetch_all else {
            return FetchAllRun::Idle;
        };

        let mut state = self.state.lock();
        if state.all_fetched {
            return FetchAllRun::Idle;
        }
        if let Some(fetching_all) = &state.fetching_all {
            return FetchAllRun::Waiting(fetching_all.promise());
        }
        let marker = Deferred::new();
        let fetching_all = marker.promise();
        state.fetching_all = Some(marker);
        let generation = state.generation;
        drop(state);

        telemetry::emit(self.name, Operation::All, Activity::Fetch, 1);
        let (sender, receiver) = oneshot::channel();
        let request = fetch_all();
        let inner = Arc::clone(self);
        self.spawner.spawn(async move {
            let outcome = inner.complete_fetch_all(generation, request.await);
            let _ = sender.send(outcome);
        });
        FetchAllRun::Started {
            fetching_all,
            outcome: receiver,
        }
    }

    fn complete_fetch_all(&self, generation: u64, fetched: Result<Vec<V>, E>) -> Result<(), AllError<E>> {
        let items = match fetched {
            Ok(items) => items,
            Err(e) => {
                let fetching_all = {
                    let mut state = self.state.lock();
                    if state.generation != generation {
                        return Err(AllError::Flushed(Flushed));
                    }
                    state.fetching_all.take()
                };
                self.report(Operation::All, &e);
                if let Some(fetching_all) = fetching_all {
                    fetching_all.settle(());
                }
                return Err(AllError::Fetch(e));
            }
        };

        let (settlements, fetching_all) = {
            let mut guard = self.state.lock();
            if guard.generation != generation {
                return Err(AllError::Flushed(Flushed));
            }
            let state = &mut *guard;
            let settlements: Vec<_> = items
                .into_iter()
                .filter_map(|item| state.resolve((self.id_of)(&item), Some(item)))
                .collect();
            state.all_fetched = true;
            (settlements, state.fetching_all.take())
        };

        for (pending, item) in settlements {
            pending.settle(item);
        }
        if let Some(fetching_all) = fetching_all {
            fetching_all.settle(());
        }
        Ok(())
    }
}

impl<K, V, E> Debug for EntityCache<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EntityCache")
            .field("name", &self.inner.name)
            .field("stored", &state.storage.len())
            .field("pending", &state.in_flight.len())
            .field("fetching_all", &state.fetching_all.is_some())
            .field("all_fetched", &state.all_fetched)
            .finish_non_exhaustive()
    }
}
