//! Partition leader selection for rebalance passes.
//!
//! The controller constructs one selector per reassignment batch (broker
//! failure, planned removal, rebalance trigger), queries it once per
//! affected partition and commits the results to cluster metadata.
//! Selectors are single-threaded by design: a batch serializes its `select`
//! calls, and a fresh selector is built for the next batch.

use rand::seq::SliceRandom;
use tracing::warn;

use crate::broker::BrokerRegistration;
use crate::topic::TopicPartition;

/// Chooses a leader broker for partitions within one reassignment batch.
pub trait PartitionLeaderSelector {
    /// Chooses a leader for the given partition.
    ///
    /// `None` means no eligible broker is available. The caller must leave
    /// the partition unassigned and retry on a later pass, never fabricate a
    /// leader.
    fn select(&mut self, tp: &TopicPartition) -> Option<i32>;
}

/// Builds a [`PartitionLeaderSelector`] scoped to one reassignment batch.
pub trait LeaderSelectorFactory {
    /// `alive_brokers` is the controller's full current membership view;
    /// `broker_to_remove` identifies a broker being decommissioned, which
    /// must never appear in any selection produced by the returned selector.
    fn create(
        &self,
        alive_brokers: &[BrokerRegistration],
        broker_to_remove: Option<i32>,
    ) -> Box<dyn PartitionLeaderSelector>;
}

/// Round-robin over a randomly shuffled candidate list.
///
/// The candidate list is filtered by the eligibility predicate and shuffled
/// once at construction, so repeated batches don't systematically favor low
/// broker ids; within a batch the same broker sequence is reused cyclically,
/// spreading leadership evenly regardless of how many partitions are
/// processed.
///
/// Selection deliberately ignores a partition's replica set and prior
/// leader. Callers that need replica-aware placement encode it in the
/// eligibility predicate or layer a different selector.
pub struct RandomLeaderSelector {
    candidates: Vec<i32>,
    cursor: usize,
}

impl RandomLeaderSelector {
    pub fn new<P>(alive_brokers: &[BrokerRegistration], predicate: P) -> Self
    where
        P: Fn(&BrokerRegistration) -> bool,
    {
        let mut candidates: Vec<i32> = alive_brokers
            .iter()
            .filter(|broker| predicate(broker))
            .map(|broker| broker.id)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        Self {
            candidates,
            cursor: 0,
        }
    }
}

impl PartitionLeaderSelector for RandomLeaderSelector {
    fn select(&mut self, _tp: &TopicPartition) -> Option<i32> {
        if self.candidates.is_empty() {
            return None;
        }

        let broker = self.candidates[self.cursor];
        self.cursor = (self.cursor + 1) % self.candidates.len();
        Some(broker)
    }
}

/// Factory for [`RandomLeaderSelector`] with the standard eligibility
/// predicate: alive and not the broker being removed.
#[derive(Debug, Default)]
pub struct RandomLeaderSelectorFactory;

impl LeaderSelectorFactory for RandomLeaderSelectorFactory {
    fn create(
        &self,
        alive_brokers: &[BrokerRegistration],
        broker_to_remove: Option<i32>,
    ) -> Box<dyn PartitionLeaderSelector> {
        Box::new(RandomLeaderSelector::new(alive_brokers, |broker| {
            Some(broker.id) != broker_to_remove
        }))
    }
}

/// Outcome of one leader-reassignment batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LeaderReassignment {
    /// Partitions with their newly chosen leader, to be committed to
    /// cluster metadata by the caller.
    pub assigned: Vec<(TopicPartition, i32)>,

    /// Partitions for which no eligible broker was available; left pending
    /// for the next rebalance pass.
    pub unresolved: Vec<TopicPartition>,
}

/// Runs one reassignment batch over `partitions`.
///
/// A pass that cannot fully complete reports precisely which partitions
/// remain unresolved rather than failing as a whole.
pub fn reassign_leaders(
    selector: &mut dyn PartitionLeaderSelector,
    partitions: impl IntoIterator<Item = TopicPartition>,
) -> LeaderReassignment {
    let mut out = LeaderReassignment::default();

    for tp in partitions {
        match selector.select(&tp) {
            Some(broker) => out.assigned.push((tp, broker)),
            None => out.unresolved.push(tp),
        }
    }

    if !out.unresolved.is_empty() {
        warn!(
            unresolved = out.unresolved.len(),
            assigned = out.assigned.len(),
            "Leader reassignment left partitions without an eligible broker",
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::HashSet;

    use super::*;

    fn brokers(ids: &[i32]) -> Vec<BrokerRegistration> {
        ids.iter()
            .map(|id| BrokerRegistration::new(*id, Some(format!("rack-{}", id % 2))))
            .collect()
    }

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("events", partition)
    }

    #[test]
    fn test_excluded_broker_is_never_selected() {
        for _ in 0..10 {
            let factory = RandomLeaderSelectorFactory;
            let mut selector = factory.create(&brokers(&[1, 2, 3, 4, 5]), Some(3));

            for partition in 0..100 {
                let selected = selector.select(&tp(partition)).unwrap();
                assert_ne!(selected, 3);
            }
        }
    }

    #[test]
    fn test_fairness_over_full_cycles() {
        let eligible = [1, 2, 3, 4];
        let mut selector = RandomLeaderSelector::new(&brokers(&eligible), |_| true);

        let n = eligible.len() * 25;
        let mut counts: HashMap<i32, usize> = HashMap::new();
        for partition in 0..n {
            let selected = selector.select(&tp(partition as i32)).unwrap();
            *counts.entry(selected).or_default() += 1;
        }

        for id in eligible {
            assert_eq!(counts[&id], 25, "broker {id} selected unevenly");
        }
    }

    #[test]
    fn test_empty_candidate_list_returns_none() {
        let mut selector = RandomLeaderSelector::new(&[], |_| true);
        for partition in 0..10 {
            assert_eq!(selector.select(&tp(partition)), None);
        }

        // fully filtered out behaves the same
        let mut selector = RandomLeaderSelector::new(&brokers(&[1, 2, 3]), |_| false);
        for partition in 0..10 {
            assert_eq!(selector.select(&tp(partition)), None);
        }
    }

    #[test]
    fn test_decommission_cycles_remaining_brokers() {
        // alive [1,2,3], removing 2: selections come from {1,3} and cycle a
        // permutation of it without repeats before starting over
        let factory = RandomLeaderSelectorFactory;
        let mut selector = factory.create(&brokers(&[1, 2, 3]), Some(2));

        let picks: Vec<i32> = (0..6).map(|p| selector.select(&tp(p)).unwrap()).collect();

        let first_cycle: HashSet<i32> = picks[..2].iter().copied().collect();
        assert_eq!(first_cycle, HashSet::from([1, 3]));
        for window in picks.chunks(2) {
            assert_eq!(window, &picks[..2]);
        }
    }

    #[test]
    fn test_reassignment_reports_unresolved_partitions() {
        let factory = RandomLeaderSelectorFactory;

        let mut selector = factory.create(&brokers(&[7]), Some(7));
        let out = reassign_leaders(&mut *selector, (0..3).map(tp));
        assert!(out.assigned.is_empty());
        assert_eq!(out.unresolved, vec![tp(0), tp(1), tp(2)]);

        let mut selector = factory.create(&brokers(&[7]), None);
        let out = reassign_leaders(&mut *selector, (0..3).map(tp));
        assert_eq!(out.assigned.len(), 3);
        assert!(out.assigned.iter().all(|(_, broker)| *broker == 7));
        assert!(out.unresolved.is_empty());
    }
}
