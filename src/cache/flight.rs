//! Per-key single-flight population.
//!
//! The first caller for a key starts the load; callers arriving while it is
//! pending await the same shared future and observe the same result. When
//! every waiter has gone away before completion the load is dropped, so a
//! cancelled population never reaches the store.
//!
//! A flight belongs to the store epoch it started in. Once an eviction has
//! moved the epoch on, later callers start a fresh flight instead of joining
//! one that may have read pre-eviction data.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tracing::trace;

use super::error::CacheError;
use super::keys::CacheKey;
use super::metric_names::METRIC_FLIGHT_JOINED_TOTAL;
use super::store::{CacheEntry, Epoch};

type FlightResult = Result<Arc<CacheEntry>, CacheError>;
type FlightFuture = Shared<BoxFuture<'static, FlightResult>>;

struct Flight {
    id: u64,
    epoch: Epoch,
    waiters: Arc<AtomicUsize>,
    future: FlightFuture,
}

#[derive(Default)]
pub struct FlightGroup {
    flights: Arc<DashMap<CacheKey, Flight>>,
    next_id: AtomicU64,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` for `key` unless a load for it started in `epoch` is already pending,
    /// in which case join it.
    ///
    /// `load` is only invoked by the caller that starts the flight.
    pub async fn run<F, Fut>(&self, key: &CacheKey, epoch: Epoch, load: F) -> FlightResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult> + Send + 'static,
    {
        let (id, future) = match self.flights.entry(key.clone()) {
            Entry::Occupied(occupied) if occupied.get().epoch == epoch => {
                let flight = occupied.get();
                flight.waiters.fetch_add(1, Ordering::AcqRel);
                counter!(METRIC_FLIGHT_JOINED_TOTAL).increment(1);
                trace!(key = %key, flight = flight.id, "Joined in-flight population");
                (flight.id, flight.future.clone())
            }
            Entry::Occupied(mut occupied) => {
                let (flight, future) = self.start(key, epoch, load);
                trace!(
                    key = %key,
                    superseded = occupied.get().id,
                    flight = flight.id,
                    "Eviction outdated the pending population; starting a new one"
                );
                let id = flight.id;
                // Waiters of the superseded flight keep their own handle to it.
                occupied.insert(flight);
                (id, future)
            }
            Entry::Vacant(vacant) => {
                let (flight, future) = self.start(key, epoch, load);
                let id = flight.id;
                vacant.insert(flight);
                (id, future)
            }
        };

        let _waiter = WaiterGuard {
            flights: &self.flights,
            key,
            id,
        };
        future.await
    }

    fn start<F, Fut>(&self, key: &CacheKey, epoch: Epoch, load: F) -> (Flight, FlightFuture)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let flights = Arc::clone(&self.flights);
        let owned_key = key.clone();
        let pending = load();
        let future = async move {
            let result = pending.await;
            flights.remove_if(&owned_key, |_, flight| flight.id == id);
            result
        }
        .boxed()
        .shared();
        let flight = Flight {
            id,
            epoch,
            waiters: Arc::new(AtomicUsize::new(1)),
            future: future.clone(),
        };
        (flight, future)
    }

    /// Number of loads currently pending.
    pub fn pending(&self) -> usize {
        self.flights.len()
    }
}

/// Releases one waiter; the last one out drops an unfinished flight.
struct WaiterGuard<'a> {
    flights: &'a DashMap<CacheKey, Flight>,
    key: &'a CacheKey,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let remaining = self
            .flights
            .get(self.key)
            .filter(|flight| flight.id == self.id)
            .map(|flight| flight.waiters.fetch_sub(1, Ordering::AcqRel) - 1);
        if remaining == Some(0) {
            self.flights.remove_if(self.key, |_, flight| {
                flight.id == self.id && flight.waiters.load(Ordering::Acquire) == 0
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use time::OffsetDateTime;
    use tokio::sync::Notify;

    use super::*;
    use crate::cache::keys::{Strategy, build_key};
    use crate::cache::store::EntryDraft;
    use crate::domain::products::Product;

    fn entry(key: &CacheKey) -> Arc<CacheEntry> {
        let draft = EntryDraft {
            key: key.clone(),
            payload: Arc::from(Vec::<Product>::new()),
            tags: BTreeSet::new(),
            ttl: Duration::from_secs(60),
            epoch: 0,
        };
        Arc::new(CacheEntry::from_draft(
            &draft,
            OffsetDateTime::now_utc(),
            draft.ttl,
            draft.ttl,
        ))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let group = Arc::new(FlightGroup::new());
        let key = build_key(Strategy::Layered, "Tools", 100).unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let group = Arc::clone(&group);
            let key = key.clone();
            let loads = Arc::clone(&loads);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                group
                    .run(&key, 0, || {
                        let key = key.clone();
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            release.notified().await;
                            Ok(entry(&key))
                        }
                    })
                    .await
            }));
        }

        while group.pending() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(group.pending(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_and_not_cached() {
        let group = FlightGroup::new();
        let key = build_key(Strategy::Layered, "Tools", 100).unwrap();

        let err = group
            .run(&key, 0, || async { Err(CacheError::backend("down")) })
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::BackendUnavailable("down".to_string()));
        assert_eq!(group.pending(), 0);

        let ok_key = key.clone();
        let ok = group.run(&key, 0, move || async move { Ok(entry(&ok_key)) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn abandoned_flight_is_dropped() {
        let group = Arc::new(FlightGroup::new());
        let key = build_key(Strategy::Layered, "Tools", 100).unwrap();
        let completed = Arc::new(AtomicUsize::new(0));

        let task = {
            let group = Arc::clone(&group);
            let key = key.clone();
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                group
                    .run(&key, 0, || async move {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        completed.fetch_add(1, Ordering::SeqCst);
                        Err(CacheError::Cancelled)
                    })
                    .await
            })
        };

        while group.pending() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert_eq!(group.pending(), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn newer_epoch_starts_its_own_flight() {
        let group = Arc::new(FlightGroup::new());
        let key = build_key(Strategy::Layered, "Tools", 100).unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let early = {
            let group = Arc::clone(&group);
            let key = key.clone();
            let loads = Arc::clone(&loads);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                group
                    .run(&key, 0, || {
                        let key = key.clone();
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            release.notified().await;
                            Ok(entry(&key))
                        }
                    })
                    .await
            })
        };
        while group.pending() == 0 {
            tokio::task::yield_now().await;
        }

        let late_key = key.clone();
        let late_loads = Arc::clone(&loads);
        let late = group
            .run(&key, 1, move || async move {
                late_loads.fetch_add(1, Ordering::SeqCst);
                Ok(entry(&late_key))
            })
            .await;
        assert!(late.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        release.notify_one();
        assert!(early.await.unwrap().is_ok());
        assert_eq!(group.pending(), 0);
    }
}
