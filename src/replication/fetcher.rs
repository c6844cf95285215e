use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::topic::TopicPartition;

/// Error fetching from the source cluster.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transient failure scoped to one partition.
    ///
    /// Retried with backoff by the owning worker; sibling partitions are
    /// unaffected.
    #[error("Fetch failed for partition: {0}")]
    Partition(Box<dyn std::error::Error + Send + Sync>),

    /// The source cluster connection itself cannot be established.
    ///
    /// Reported upward through [`FetcherState::Unavailable`] for the
    /// supervision layer to decide on; the worker keeps retrying meanwhile.
    #[error("Source cluster unavailable: {0}")]
    Unavailable(Box<dyn std::error::Error + Send + Sync>),
}

/// Progress made by one fetch round for a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Offset to request next.
    ///
    /// Must not be behind the offset the round was issued for; workers
    /// never move a partition's fetch position backwards.
    pub next_offset: i64,
}

/// Client side of the source cluster, supplied by the caller.
///
/// An implementation pulls one round of data for `tp` starting at `offset`,
/// applies it downstream and returns the offset to request next. Blocking on
/// the network happens in here, never under the assignment lock.
#[async_trait]
pub trait FetchSource: Send + Sync + 'static {
    async fn fetch(&self, tp: &TopicPartition, offset: i64) -> Result<FetchProgress, FetchError>;
}

/// Lifecycle of a fetch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherState {
    /// No partitions assigned.
    Idle,

    /// At least one partition assigned, fetch loop active.
    Fetching,

    /// The source connection cannot be established; retrying.
    Unavailable,
}

/// Capability interface of a fetch worker.
///
/// [`FetcherManager`](super::FetcherManager) owns a homogeneous pool of
/// these and dispatches assignment changes through it.
pub trait FetchWorker: Send + Sync {
    /// Adds partitions to this worker's working set.
    ///
    /// The whole batch becomes visible to the fetch loop atomically.
    fn assign(&self, partitions: Vec<TopicPartition>);

    /// Removes partitions from this worker's working set.
    ///
    /// In-flight fetches for removed partitions stop at their next safe
    /// checkpoint; remaining partitions continue without interruption.
    fn unassign(&self, partitions: &BTreeSet<TopicPartition>);

    /// Number of partitions currently assigned.
    fn partition_count(&self) -> usize;

    /// Current lifecycle state.
    fn state(&self) -> FetcherState;

    /// Signals the worker to stop at its next safe checkpoint and returns
    /// the task handle to await.
    fn shutdown(self) -> JoinHandle<()>
    where
        Self: Sized;
}

struct Shared {
    fetcher_id: usize,
    assignment: Mutex<BTreeSet<TopicPartition>>,
    wake: Notify,
    stopped: AtomicBool,
}

/// A replication fetch worker backed by its own tokio task.
///
/// The task loops over the worker's assigned partitions, pulling data for
/// each through the [`FetchSource`] and tracking per-partition fetch
/// positions. Partition-level failures are isolated: a failing partition is
/// backed off individually while its siblings keep fetching.
pub struct ReplicationFetcher {
    shared: Arc<Shared>,
    state: watch::Receiver<FetcherState>,
    task: JoinHandle<()>,
}

impl ReplicationFetcher {
    /// Creates the worker and spawns its fetch loop onto the current
    /// runtime.
    pub fn spawn(
        fetcher_id: usize,
        source: Arc<dyn FetchSource>,
        backoff_config: BackoffConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            fetcher_id,
            assignment: Mutex::new(BTreeSet::new()),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
        });
        let (state_tx, state_rx) = watch::channel(FetcherState::Idle);
        let task = tokio::spawn(run(Arc::clone(&shared), source, backoff_config, state_tx));

        Self {
            shared,
            state: state_rx,
            task,
        }
    }
}

impl std::fmt::Debug for ReplicationFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationFetcher")
            .field("fetcher_id", &self.shared.fetcher_id)
            .finish_non_exhaustive()
    }
}

impl FetchWorker for ReplicationFetcher {
    fn assign(&self, partitions: Vec<TopicPartition>) {
        {
            let mut assignment = self.shared.assignment.lock();
            for tp in partitions {
                assignment.insert(tp);
            }
        }
        self.shared.wake.notify_one();
    }

    fn unassign(&self, partitions: &BTreeSet<TopicPartition>) {
        {
            let mut assignment = self.shared.assignment.lock();
            for tp in partitions {
                assignment.remove(tp);
            }
        }
        self.shared.wake.notify_one();
    }

    fn partition_count(&self) -> usize {
        self.shared.assignment.lock().len()
    }

    fn state(&self) -> FetcherState {
        *self.state.borrow()
    }

    fn shutdown(self) -> JoinHandle<()> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        self.task
    }
}

/// Per-partition fetch position and failure bookkeeping.
struct PartitionProgress {
    next_offset: i64,
    retry_at: Instant,
    backoff: Backoff,
}

impl PartitionProgress {
    fn new(config: &BackoffConfig, now: Instant) -> Self {
        Self {
            next_offset: 0,
            retry_at: now,
            backoff: Backoff::new(config),
        }
    }

    fn record_failure(&mut self) -> std::time::Duration {
        let delay = self.backoff.next();
        self.retry_at = Instant::now() + delay;
        delay
    }

    fn record_success(&mut self) {
        self.backoff.reset();
    }
}

fn set_state(state: &watch::Sender<FetcherState>, new: FetcherState) {
    state.send_if_modified(|current| {
        if *current == new {
            false
        } else {
            *current = new;
            true
        }
    });
}

async fn run(
    shared: Arc<Shared>,
    source: Arc<dyn FetchSource>,
    backoff_config: BackoffConfig,
    state: watch::Sender<FetcherState>,
) {
    let fetcher = shared.fetcher_id;
    let mut progress: BTreeMap<TopicPartition, PartitionProgress> = BTreeMap::new();
    let mut source_backoff = Backoff::new(&backoff_config);

    loop {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        // snapshot the assignment; the lock is never held across a fetch
        let assigned: BTreeSet<TopicPartition> = shared.assignment.lock().clone();

        // fetch state of partitions removed since the last round is dropped
        progress.retain(|tp, _| assigned.contains(tp));

        if assigned.is_empty() {
            set_state(&state, FetcherState::Idle);
            shared.wake.notified().await;
            continue;
        }

        set_state(&state, FetcherState::Fetching);

        let now = Instant::now();
        let mut fetched_any = false;
        let mut source_down = false;

        for tp in &assigned {
            if shared.stopped.load(Ordering::SeqCst) {
                break;
            }

            let partition = progress
                .entry(tp.clone())
                .or_insert_with(|| PartitionProgress::new(&backoff_config, now));
            if partition.retry_at > now {
                continue;
            }

            match source.fetch(tp, partition.next_offset).await {
                Ok(outcome) => {
                    fetched_any = true;
                    source_backoff.reset();

                    // safe checkpoint: a partition unassigned while its fetch
                    // was in flight keeps nothing, its state is dropped at
                    // the top of the next round
                    if !shared.assignment.lock().contains(tp) {
                        debug!(
                            fetcher,
                            partition = %tp,
                            "Discarding fetch progress for removed partition",
                        );
                        continue;
                    }

                    // fetch positions only ever move forward
                    if outcome.next_offset > partition.next_offset {
                        partition.next_offset = outcome.next_offset;
                    }
                    partition.record_success();
                }
                Err(FetchError::Partition(err)) => {
                    let delay = partition.record_failure();
                    warn!(
                        fetcher,
                        partition = %tp,
                        %err,
                        backoff_ms = delay.as_millis() as u64,
                        "Fetch failed, backing off partition",
                    );
                }
                Err(FetchError::Unavailable(err)) => {
                    error!(fetcher, %err, "Source cluster unavailable");
                    source_down = true;
                    break;
                }
            }
        }

        if source_down {
            set_state(&state, FetcherState::Unavailable);
            let delay = source_backoff.next();
            let wake = shared.wake.notified();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wake => {}
            }
            continue;
        }

        if !fetched_any {
            // every assigned partition is waiting out a backoff
            let wake = shared.wake.notified();
            match progress.values().map(|p| p.retry_at).min() {
                Some(retry_at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(retry_at) => {}
                        _ = wake => {}
                    }
                }
                None => wake.await,
            }
        }
    }

    debug!(fetcher, "Fetch loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingSource {
        pub(crate) calls: Mutex<Vec<(TopicPartition, i64)>>,
        pub(crate) failing: Mutex<HashSet<TopicPartition>>,
        pub(crate) unavailable: AtomicBool,
    }

    impl RecordingSource {
        pub(crate) fn offsets_for(&self, tp: &TopicPartition) -> Vec<i64> {
            self.calls
                .lock()
                .iter()
                .filter(|(called, _)| called == tp)
                .map(|(_, offset)| *offset)
                .collect()
        }
    }

    #[async_trait]
    impl FetchSource for RecordingSource {
        async fn fetch(
            &self,
            tp: &TopicPartition,
            offset: i64,
        ) -> Result<FetchProgress, FetchError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(FetchError::Unavailable("connect refused".into()));
            }

            self.calls.lock().push((tp.clone(), offset));
            if self.failing.lock().contains(tp) {
                return Err(FetchError::Partition("injected".into()));
            }

            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(FetchProgress {
                next_offset: offset + 10,
            })
        }
    }

    pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("mirror", partition)
    }

    fn quick_backoff() -> BackoffConfig {
        BackoffConfig {
            init_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
            base: 2.0,
        }
    }

    #[tokio::test]
    async fn test_state_follows_assignment() {
        let source = Arc::new(RecordingSource::default());
        let worker = ReplicationFetcher::spawn(0, source.clone(), quick_backoff());

        assert_eq!(worker.state(), FetcherState::Idle);

        worker.assign(vec![tp(0)]);
        wait_for(|| worker.state() == FetcherState::Fetching).await;

        worker.unassign(&BTreeSet::from([tp(0)]));
        wait_for(|| worker.state() == FetcherState::Idle).await;

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_offsets_advance_monotonically() {
        let source = Arc::new(RecordingSource::default());
        let worker = ReplicationFetcher::spawn(0, source.clone(), quick_backoff());

        worker.assign(vec![tp(0), tp(1)]);
        wait_for(|| source.offsets_for(&tp(0)).len() >= 5).await;

        worker.shutdown().await.unwrap();

        for partition in [tp(0), tp(1)] {
            let offsets = source.offsets_for(&partition);
            assert!(!offsets.is_empty());
            for pair in offsets.windows(2) {
                assert!(pair[1] > pair[0], "offsets went backwards: {offsets:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_partition_failure_does_not_stall_siblings() {
        let source = Arc::new(RecordingSource::default());
        source.failing.lock().insert(tp(0));

        let worker = ReplicationFetcher::spawn(0, source.clone(), quick_backoff());
        worker.assign(vec![tp(0), tp(1)]);

        wait_for(|| source.offsets_for(&tp(1)).len() >= 20).await;
        assert_eq!(worker.state(), FetcherState::Fetching);

        // the failing partition is retried, but held back by its backoff
        let failing_calls = source.offsets_for(&tp(0)).len();
        assert!(failing_calls >= 1);
        assert!(failing_calls < source.offsets_for(&tp(1)).len());

        // once the failure clears, its fetch position resumes from where it
        // stalled
        source.failing.lock().clear();
        wait_for(|| source.offsets_for(&tp(0)).len() >= failing_calls + 3).await;
        let offsets = source.offsets_for(&tp(0));
        assert!(offsets[..=failing_calls].iter().all(|offset| *offset == 0));

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_source_is_reported_and_recovered_from() {
        let source = Arc::new(RecordingSource::default());
        source.unavailable.store(true, Ordering::SeqCst);

        let worker = ReplicationFetcher::spawn(0, source.clone(), quick_backoff());
        worker.assign(vec![tp(0)]);

        wait_for(|| worker.state() == FetcherState::Unavailable).await;

        source.unavailable.store(false, Ordering::SeqCst);
        wait_for(|| worker.state() == FetcherState::Fetching).await;

        worker.shutdown().await.unwrap();
    }
}
