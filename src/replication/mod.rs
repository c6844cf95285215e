//! Distribution of replicated partitions across a bounded pool of fetch
//! workers for cross-cluster topic mirroring.
//!
//! The pool size is fixed for the manager's lifetime and bounds the number
//! of parallel fetch streams to the source cluster. Partitions come and go
//! with the source cluster's topic set; each add/remove event mutates the
//! partition→worker map under exclusive access, and every partition being
//! replicated is owned by exactly one worker at all times. Assignments are
//! stable: a partition never migrates unless it is removed or the pool is
//! torn down (resizing the pool is a restart, not a rebalance).

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::BackoffConfig;
use crate::topic::TopicPartition;

pub mod fetcher;

pub use fetcher::{
    FetchError, FetchProgress, FetchSource, FetchWorker, FetcherState, ReplicationFetcher,
};

/// Owns a homogeneous pool of fetch workers and keeps the dynamic partition
/// set distributed across them.
#[derive(Debug)]
pub struct FetcherManager<W>
where
    W: FetchWorker,
{
    workers: Vec<W>,

    /// Partition to fetcher-id map, the authoritative assignment.
    assignment: Mutex<HashMap<TopicPartition, usize>>,
}

impl<W> FetcherManager<W>
where
    W: FetchWorker,
{
    /// Creates the pool, invoking `make_worker` once per fetcher id.
    ///
    /// # Panics
    ///
    /// If `num_fetchers` is zero.
    pub fn new<F>(num_fetchers: usize, make_worker: F) -> Self
    where
        F: FnMut(usize) -> W,
    {
        assert!(num_fetchers > 0, "fetcher pool must not be empty");

        Self {
            workers: (0..num_fetchers).map(make_worker).collect(),
            assignment: Mutex::new(HashMap::new()),
        }
    }

    /// Size of the worker pool, fixed at construction.
    pub fn num_fetchers(&self) -> usize {
        self.workers.len()
    }

    /// Number of partitions currently being replicated.
    pub fn partition_count(&self) -> usize {
        self.assignment.lock().len()
    }

    /// The fetcher id a partition is currently assigned to.
    pub fn fetcher_for(&self, tp: &TopicPartition) -> Option<usize> {
        self.assignment.lock().get(tp).copied()
    }

    /// Current state of every worker, indexed by fetcher id.
    pub fn states(&self) -> Vec<FetcherState> {
        self.workers.iter().map(|worker| worker.state()).collect()
    }

    /// Fetcher id a partition hashes to.
    ///
    /// Deterministic across processes and restarts, so repeated discovery of
    /// the same partition set lands on the same workers.
    fn fetcher_id(&self, tp: &TopicPartition) -> usize {
        let mut hasher = DefaultHasher::new();
        tp.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }

    /// Starts replicating the given partitions.
    ///
    /// Placement is by hash of the partition identity modulo the pool size.
    /// Partitions already assigned are left untouched, so overlapping
    /// discovery events cause no churn.
    pub fn add_partitions(&self, partitions: BTreeSet<TopicPartition>) {
        let mut per_worker: BTreeMap<usize, Vec<TopicPartition>> = BTreeMap::new();

        {
            let mut assignment = self.assignment.lock();
            for tp in partitions {
                if assignment.contains_key(&tp) {
                    continue;
                }
                let fetcher = self.fetcher_id(&tp);
                assignment.insert(tp.clone(), fetcher);
                per_worker.entry(fetcher).or_default().push(tp);
            }
        }

        for (fetcher, batch) in per_worker {
            debug!(
                fetcher,
                partitions = batch.len(),
                "Assigning partitions to fetcher",
            );
            self.workers[fetcher].assign(batch);
        }
    }

    /// Stops replicating the given partitions.
    ///
    /// Only the owning workers are touched; their remaining partitions and
    /// all other workers continue without interruption. Unknown partitions
    /// are ignored.
    pub fn remove_partitions(&self, partitions: &BTreeSet<TopicPartition>) {
        let mut per_worker: BTreeMap<usize, BTreeSet<TopicPartition>> = BTreeMap::new();

        {
            let mut assignment = self.assignment.lock();
            for tp in partitions {
                if let Some(fetcher) = assignment.remove(tp) {
                    per_worker.entry(fetcher).or_default().insert(tp.clone());
                }
            }
        }

        for (fetcher, batch) in per_worker {
            debug!(
                fetcher,
                partitions = batch.len(),
                "Unassigning partitions from fetcher",
            );
            self.workers[fetcher].unassign(&batch);
        }
    }

    /// Stops all workers and waits for their current fetches to unwind.
    ///
    /// The wait is bounded by `wait`: workers still running afterwards (e.g.
    /// blocked on a hung source connection) are forcibly abandoned rather
    /// than blocking shutdown indefinitely. Returns whether every worker
    /// unwound cleanly within the bound.
    pub async fn shutdown(self, wait: Duration) -> bool {
        info!(fetchers = self.workers.len(), "Shutting down fetcher pool");

        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| worker.shutdown())
            .collect();
        let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();

        match tokio::time::timeout(wait, futures::future::join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    wait_ms = wait.as_millis() as u64,
                    "Fetcher shutdown timed out, abandoning remaining fetch tasks",
                );
                for handle in abort_handles {
                    handle.abort();
                }
                false
            }
        }
    }
}

impl FetcherManager<ReplicationFetcher> {
    /// Creates a pool of [`ReplicationFetcher`]s pulling from `source`.
    pub fn replication(
        num_fetchers: usize,
        source: Arc<dyn FetchSource>,
        backoff_config: BackoffConfig,
    ) -> Self {
        Self::new(num_fetchers, |fetcher_id| {
            ReplicationFetcher::spawn(fetcher_id, Arc::clone(&source), backoff_config.clone())
        })
    }
}
