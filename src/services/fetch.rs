//! Concurrent fetch orchestrator.
//!
//! Fans a set of independent per-key lookups out with a bounded number in
//! flight, and merges the results into one map keyed by the input key.
//!
//! Two failure policies are supported:
//! - [`FetchPolicy::Strict`]: the first failure aborts the batch. Sibling
//!   lookups still in flight are dropped, which cancels them.
//! - [`FetchPolicy::Lenient`]: a failing key is left out of the result.
//!   Fatal errors (authentication, cancellation) still abort the batch.
//!
//! Results are merged by the single task polling the stream, so the map
//! never has more than one writer.

use crate::config::DEFAULT_FETCH_CONCURRENCY;
use crate::error::AppError;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

/// How a batch reacts to a single failing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Abort the whole batch on the first failure.
    Strict,

    /// Drop failing keys from the result.
    Lenient,
}

/// Runs batches of lookups with a concurrency cap and a shared
/// cancellation token.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    concurrency: usize,
    cancel: CancellationToken,
}

impl Default for FetchOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_CONCURRENCY)
    }
}

impl FetchOrchestrator {
    /// Create an orchestrator with its own cancellation token.
    pub fn new(concurrency: usize) -> Self {
        Self::with_cancellation(concurrency, CancellationToken::new())
    }

    /// Create an orchestrator bound to an existing cancellation token.
    pub fn with_cancellation(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Orchestrator whose token is cancelled when this one is, but which
    /// can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            concurrency: self.concurrency,
            cancel: self.cancel.child_token(),
        }
    }

    /// Maximum number of lookups in flight per batch.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The token that cancels every batch run by this orchestrator.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fetch` for every distinct key and collect the results.
    ///
    /// Under [`FetchPolicy::Strict`] the returned map holds exactly the
    /// distinct input keys; under [`FetchPolicy::Lenient`] it holds a subset.
    pub async fn fetch_all<K, V, F, Fut>(
        &self,
        keys: impl IntoIterator<Item = K>,
        policy: FetchPolicy,
        fetch: F,
    ) -> Result<HashMap<K, V>, AppError>
    where
        K: Eq + Hash + Clone + Debug,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<V, AppError>>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<K> = keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();

        let mut results = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(results);
        }
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut in_flight = stream::iter(keys)
            .map(|key| {
                let lookup = fetch(key.clone());
                async move { (key, lookup.await) }
            })
            .buffer_unordered(self.concurrency);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
                next = in_flight.next() => next,
            };

            let Some((key, result)) = next else {
                break;
            };

            match result {
                Ok(value) => {
                    results.insert(key, value);
                }
                Err(err) if policy == FetchPolicy::Strict || err.is_fatal() => {
                    return Err(err);
                }
                Err(err) => {
                    log::debug!("Skipping {:?} after failed lookup: {}", key, err);
                }
            }
        }

        Ok(results)
    }
}
