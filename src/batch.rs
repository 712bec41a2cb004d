//! # Batched Parallel Fetcher
//!
//! Retrieves an index-addressed collection (`0..count`) from the chain in
//! fixed-width batches. Batches run strictly one after another; inside a batch
//! every index is fetched concurrently and written into its own pre-sized slot,
//! so the output order always matches index order regardless of completion
//! order.
//!
//! The first failure in a batch aborts the whole fetch: sibling tasks are
//! dropped (no longer polled), later batches never start and the results
//! gathered so far are discarded.
//!
//! A single semaphore owned by the fetcher bounds the number of per-index
//! tasks in flight across *every* concurrent call sharing it.
//!
//! A per-index function must not call back into the same fetcher: with the
//! ceiling saturated the nested call would wait on permits held by its own
//! parents.

use futures::stream::{FuturesUnordered, StreamExt};
use log::warn;
use std::cmp::min;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::metrics;

/// Largest collection a count read from chain may announce.
pub const MAX_COLLECTION_SIZE: u64 = 1 << 20;

#[derive(Clone, Debug)]
pub struct BatchFetcher {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl BatchFetcher {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Permits currently free under the global ceiling.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Fetch `fetch(i)` for every `i` in `0..count`, `batch_size` at a time.
    pub async fn fetch_indexed<T, F, Fut>(&self, count: u64, batch_size: u64, fetch: F) -> Result<Vec<T>>
    where
        F: Fn(u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch size must be > 0".to_string()));
        }
        if count > MAX_COLLECTION_SIZE {
            return Err(Error::InvalidInput(format!(
                "collection size {} exceeds {}",
                count, MAX_COLLECTION_SIZE
            )));
        }

        let mut slots: Vec<Option<T>> = Vec::with_capacity(count as usize);
        slots.resize_with(count as usize, || None);

        let fetch = &fetch;
        let mut batch_start = 0u64;
        while batch_start < count {
            let batch_end = min(batch_start.saturating_add(batch_size), count);
            metrics::record_batch_width((batch_end - batch_start) as f64);

            let mut tasks: FuturesUnordered<_> = (batch_start..batch_end)
                .map(|index| {
                    let permits = &self.permits;
                    async move {
                        let _permit = permits.acquire().await.map_err(|_| {
                            Error::batch(index, Error::InvalidInput("fetcher is closed".to_string()))
                        })?;
                        match fetch(index).await {
                            Ok(value) => Ok((index, value)),
                            Err(e) => Err(Error::batch(index, e)),
                        }
                    }
                })
                .collect();

            while let Some(result) = tasks.next().await {
                match result {
                    Ok((index, value)) => slots[index as usize] = Some(value),
                    Err(e) => {
                        metrics::increment_batch_failures();
                        warn!("Batch fetch aborted: {}", e);
                        return Err(e);
                    }
                }
            }

            batch_start = batch_end;
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    Error::batch(index as u64, Error::InvalidInput("slot was never filled".to_string()))
                })
            })
            .collect()
    }

    /// Await `count` first, then [`fetch_indexed`](Self::fetch_indexed).
    pub async fn fetch_counted<T, C, F, Fut>(&self, count: C, batch_size: u64, fetch: F) -> Result<Vec<T>>
    where
        C: Future<Output = Result<u64>>,
        F: Fn(u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let count = count.await?;
        self.fetch_indexed(count, batch_size, fetch).await
    }

    /// Fetch `fetch(&items[i])` for every item, preserving item order.
    pub async fn fetch_each<'a, A, T, F, Fut>(&self, items: &'a [A], batch_size: u64, fetch: F) -> Result<Vec<T>>
    where
        F: Fn(&'a A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.fetch_indexed(items.len() as u64, batch_size, |index| fetch(&items[index as usize]))
            .await
    }

    /// Indices in `0..count` whose fetched tag satisfies `keep`, ascending.
    pub async fn filter_indices<T, F, Fut, P>(
        &self,
        count: u64,
        batch_size: u64,
        fetch: F,
        keep: P,
    ) -> Result<Vec<u64>>
    where
        F: Fn(u64) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&T) -> bool,
    {
        let tags = self.fetch_indexed(count, batch_size, fetch).await?;
        Ok(tags
            .iter()
            .enumerate()
            .filter(|(_, tag)| keep(tag))
            .map(|(index, _)| index as u64)
            .collect())
    }
}

impl Default for BatchFetcher {
    fn default() -> Self {
        Self::new(crate::registry::DEFAULT_MAX_IN_FLIGHT)
    }
}
