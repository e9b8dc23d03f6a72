// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates how `EntityCache` coalesces user lookups against a slow backend.
//!
//! Several screens ask for the same users at roughly the same time. Only one request per user
//! reaches the backend, batches are served by a single bulk call, and a full listing makes later
//! lookups free.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use entity_cache::EntityCache;

#[derive(Clone, Debug)]
struct User {
    id: u32,
    name: String,
}

/// Pretends to be a remote user service.
#[derive(Debug, Default)]
struct Backend {
    calls: AtomicUsize,
}

impl Backend {
    async fn user(&self, id: u32) -> Result<Option<User>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok((id < 100).then(|| User { id, name: format!("user-{id}") }))
    }

    async fn users(&self, ids: Vec<u32>) -> Result<Vec<User>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(ids.into_iter().filter(|id| *id < 100).map(|id| User { id, name: format!("user-{id}") }).collect())
    }

    async fn all_users(&self) -> Result<Vec<User>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok((0..10).map(|id| User { id, name: format!("user-{id}") }).collect())
    }
}

#[tokio::main]
async fn main() {
    let backend = Arc::new(Backend::default());

    let single = Arc::clone(&backend);
    let bulk = Arc::clone(&backend);
    let listing = Arc::clone(&backend);
    let cache = EntityCache::builder(
        |user: &User| user.id,
        move |id: u32| {
            let backend = Arc::clone(&single);
            async move { backend.user(id).await }
        },
    )
    .name("users")
    .bulk_fetch(move |ids: Vec<u32>| {
        let backend = Arc::clone(&bulk);
        async move { backend.users(ids).await }
    })
    .fetch_all(move || {
        let backend = Arc::clone(&listing);
        async move { backend.all_users().await }
    })
    .error_handler(|e: &String| eprintln!("backend error: {e}"))
    .build();

    println!("Five screens request user 1 concurrently...");
    let lookups: Vec<_> = (0..5).map(|_| cache.get(1)).collect();
    for user in futures::future::join_all(lookups).await {
        println!("  got {:?}", user.ok().flatten().map(|user| user.name));
    }
    println!("Backend calls so far: {}\n", backend.calls.load(Ordering::SeqCst));

    println!("A list view requests users 1, 2, 3 and 500...");
    let users = cache.batch([1, 2, 3, 500]).await.unwrap_or_default();
    for user in &users {
        println!("  got {:?}", user.as_ref().map(|user| &user.name));
    }
    println!("Backend calls so far: {}\n", backend.calls.load(Ordering::SeqCst));

    println!("A directory page lists everyone...");
    match cache.all().await {
        Ok(users) => println!("  {} users loaded", users.len()),
        Err(e) => println!("  listing failed: {e}"),
    }
    println!("Backend calls so far: {}\n", backend.calls.load(Ordering::SeqCst));

    println!("After the listing, lookups are served from memory...");
    let user = cache.get(7).await.ok().flatten();
    println!("  got {:?}", user.map(|user| user.name));
    println!("Backend calls so far: {}\n", backend.calls.load(Ordering::SeqCst));

    println!("Signing out flushes everything...");
    cache.flush();
    println!("  cached users: {}", cache.len());
}
