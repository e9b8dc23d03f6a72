// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Errors surfaced by [`EntityCache`](crate::EntityCache).

/// A pending request was abandoned because the cache was flushed.
///
/// Returned by every `get`, `batch` or `all` future that was still waiting on a fetch when
/// [`EntityCache::flush`](crate::EntityCache::flush) ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all data and pending requests were flushed")]
pub struct Flushed;

/// Error returned by [`EntityCache::all`](crate::EntityCache::all).
#[derive(Debug, thiserror::Error)]
pub enum AllError<E> {
    /// The cache was flushed while the call was waiting on pending requests.
    #[error(transparent)]
    Flushed(#[from] Flushed),

    /// The fetch-all operation started by this call failed.
    ///
    /// The error has already been passed to the cache's error handler.
    #[error("fetching all entities failed")]
    Fetch(#[source] E),
}

impl<E> AllError<E> {
    /// Returns `true` if the call was abandoned by a flush.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        matches!(self, Self::Flushed(_))
    }

    /// Returns the fetch error, if this is a fetch failure.
    #[must_use]
    pub fn into_fetch_error(self) -> Option<E> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Flushed(_) => None,
        }
    }
}
