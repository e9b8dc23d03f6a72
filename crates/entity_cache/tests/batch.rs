// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_docs, reason = "test code")]

//! Integration tests for `EntityCache::batch()` and `EntityCache::watch_batch()`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use entity_cache::EntityCache;
use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq)]
struct User {
    id: u32,
    name: String,
}

fn user(id: u32) -> User {
    User { id, name: format!("x{id}") }
}

fn ids_of(users: &[Option<User>]) -> Vec<Option<u32>> {
    let mut ids: Vec<_> = users.iter().map(|user| user.as_ref().map(|user| user.id)).collect();
    ids.sort_unstable();
    ids
}

/// Records every bulk request and answers only the ids in `known`.
fn bulk_cache(requests: &Arc<Mutex<Vec<Vec<u32>>>>, known: &'static [u32]) -> EntityCache<u32, User, String> {
    let requests = Arc::clone(requests);
    EntityCache::builder(|user: &User| user.id, |id: u32| async move { Ok(Some(user(id))) })
        .bulk_fetch(move |ids: Vec<u32>| {
            requests.lock().push(ids.clone());
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(ids.into_iter().filter(|id| known.contains(id)).map(user).collect())
            }
        })
        .build()
}

#[tokio::test]
async fn ids_missing_from_bulk_response_resolve_absent() {
    let requests = Arc::default();
    let cache = bulk_cache(&requests, &[1, 3]);

    let users = cache.batch([1, 2, 3]).await.unwrap();

    assert_eq!(ids_of(&users), vec![None, Some(1), Some(3)]);
    assert_eq!(*requests.lock(), vec![vec![1, 2, 3]]);
    assert!(cache.contains(&1));
    assert!(!cache.contains(&2));
    assert!(cache.contains(&3));
    assert_eq!(cache.pending(), 0);
}

#[tokio::test]
async fn repeated_ids_fetched_once() {
    let requests = Arc::default();
    let cache = bulk_cache(&requests, &[4, 5]);

    let users = cache.batch([4, 4, 5]).await.unwrap();

    assert_eq!(ids_of(&users), vec![Some(4), Some(4), Some(5)]);
    assert_eq!(*requests.lock(), vec![vec![4, 5]]);
}

#[tokio::test]
async fn stored_and_in_flight_ids_are_not_refetched() {
    let requests = Arc::new(Mutex::new(Vec::<Vec<u32>>::new()));
    let singles = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&singles);
    let recorder = Arc::clone(&requests);
    let cache = EntityCache::builder(
        |user: &User| user.id,
        move |id: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(Some(user(id)))
            }
        },
    )
    .bulk_fetch(move |ids: Vec<u32>| {
        recorder.lock().push(ids.clone());
        async move { Ok(ids.into_iter().map(user).collect()) }
    })
    .build();

    cache.add(user(1));
    let single = cache.get(2);
    let users = cache.batch([1, 2, 3]).await.unwrap();

    assert_eq!(ids_of(&users), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(single.await.unwrap(), Some(user(2)));
    assert_eq!(*requests.lock(), vec![vec![3]]);
    assert_eq!(singles.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn falls_back_to_single_fetches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cache = EntityCache::builder(
        |user: &User| user.id,
        move |id: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>((id != 2).then(|| user(id))) }
        },
    )
    .build();

    let users = cache.batch([1, 2, 3]).await.unwrap();

    assert_eq!(ids_of(&users), vec![None, Some(1), Some(3)]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_batch_resolves_immediately() {
    let requests = Arc::default();
    let cache = bulk_cache(&requests, &[]);

    let users = cache.batch(Vec::new()).await.unwrap();

    assert!(users.is_empty());
    assert!(requests.lock().is_empty());
}

#[tokio::test]
async fn fully_cached_batch_skips_fetch() {
    let requests = Arc::default();
    let cache = bulk_cache(&requests, &[]);
    cache.add(user(1));
    cache.add(user(2));

    let users = cache.batch([2, 1]).await.unwrap();

    assert_eq!(ids_of(&users), vec![Some(1), Some(2)]);
    assert!(requests.lock().is_empty());
}

#[tokio::test]
async fn failed_bulk_fetch_leaves_batch_pending() {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    let cache = EntityCache::builder(|user: &User| user.id, |id: u32| async move { Ok(Some(user(id))) })
        .bulk_fetch(|_ids: Vec<u32>| async { Err("bulk down".to_string()) })
        .error_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let outcome = tokio::time::timeout(Duration::from_millis(100), cache.batch([1, 2])).await;

    assert!(outcome.is_err(), "batch should stay pending after a failed bulk fetch");
    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert_eq!(cache.pending(), 2);

    cache.flush();
    assert_eq!(cache.pending(), 0);
}

#[tokio::test]
async fn settle_batch_failures_resolves_ids_absent() {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    let cache = EntityCache::builder(|user: &User| user.id, |id: u32| async move { Ok(Some(user(id))) })
        .bulk_fetch(|_ids: Vec<u32>| async { Err("bulk down".to_string()) })
        .error_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .settle_batch_failures(true)
        .build();

    let users = cache.batch([1, 2]).await.unwrap();

    assert_eq!(users, vec![None, None]);
    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert_eq!(cache.pending(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn batch_waits_for_running_fetch_all() {
    let requests = Arc::new(Mutex::new(Vec::<Vec<u32>>::new()));
    let recorder = Arc::clone(&requests);
    let cache = EntityCache::builder(|user: &User| user.id, |id: u32| async move { Ok::<_, String>(Some(user(id))) })
        .bulk_fetch(move |ids: Vec<u32>| {
            recorder.lock().push(ids.clone());
            async move { Ok(ids.into_iter().map(user).collect()) }
        })
        .fetch_all(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![user(1), user(2), user(3)])
        })
        .build();

    let all = cache.all();
    let (all, users) = futures::join!(all, cache.batch([2, 3]));

    assert_eq!(all.unwrap().len(), 3);
    assert_eq!(ids_of(&users.unwrap()), vec![Some(2), Some(3)]);
    assert!(requests.lock().is_empty());
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn watch_batch_publishes_when_settled() {
    let requests = Arc::default();
    let cache = bulk_cache(&requests, &[1, 2]);

    let mut view = cache.watch_batch([1, 2, 3]);
    assert!(!view.is_settled());
    assert!(view.current().is_empty());

    let users = view.settled().await.unwrap();

    assert_eq!(ids_of(&users), vec![None, Some(1), Some(2)]);
    assert!(view.is_settled());
    assert_eq!(view.current().len(), 3);
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn watch_batch_stays_empty_after_flush() {
    let cache = EntityCache::builder(|user: &User| user.id, |_id: u32| std::future::pending::<Result<Option<User>, String>>()).build();

    let mut view = cache.watch_batch([1]);
    tokio::task::yield_now().await;
    cache.flush();

    assert_eq!(view.settled().await, None);
    assert!(view.current().is_empty());
}
