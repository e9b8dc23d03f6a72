// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Request-coalescing in-memory cache for asynchronously fetched entities.
//!
//! [`EntityCache`] memoizes entities keyed by an identifier that is derived from the entity
//! itself. Concurrent requests for the same identifier collapse into a single fetch, batch
//! requests are coalesced into one bulk fetch, and an optional "fetch all" operation can load the
//! complete entity set at once.
//!
//! # Example
//!
//! ```
//! use entity_cache::EntityCache;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = EntityCache::builder(
//!     |user: &User| user.id,
//!     |id: u32| async move { Ok::<_, std::io::Error>(Some(User { id, name: format!("x{id}") })) },
//! )
//! .build();
//!
//! // Both requests share a single fetch.
//! let (a, b) = futures::join!(cache.get(1), cache.get(1));
//! assert_eq!(a.unwrap(), b.unwrap());
//!
//! // Results arrive in completion order.
//! let users = cache.batch([1, 2, 3]).await.unwrap();
//! assert_eq!(users.len(), 3);
//! # }
//! ```
//!
//! # Error Handling
//!
//! Fetch failures never surface from [`EntityCache::get`] or [`EntityCache::batch`]. They are
//! reported to the error handler installed with [`EntityCache::set_error_handler`] and the
//! affected identifiers resolve as absent (`None`). The only error those calls return is
//! [`Flushed`], produced when [`EntityCache::flush`] abandons pending requests.
//!
//! # Features
//!
//! - `tokio` (default): enables [`Spawner::new_tokio`], uses it as the default spawner and
//!   provides [`EntityCache::watch_batch`]
//! - `logs`: emits `tracing` events for fetches, failures and flushes

mod builder;
mod cache;
mod deferred;
mod error;
mod spawner;
mod telemetry;
#[cfg(feature = "tokio")]
mod view;

#[doc(inline)]
pub use builder::EntityCacheBuilder;
#[doc(inline)]
pub use cache::{CacheName, EntityCache};
#[doc(inline)]
pub use error::{AllError, Flushed};
#[doc(inline)]
pub use spawner::Spawner;
#[cfg(feature = "tokio")]
#[doc(inline)]
pub use view::BatchView;
