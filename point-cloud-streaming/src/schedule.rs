//! Fetch scheduling: node-state machine plus priority queue.
//!
//! Node states move strictly `Unrequested -> Queued -> Loading -> Loaded`
//! or `Failed`, with network failures dropping back to `Unrequested` so a
//! later viewport can try again. `Unrequested` is represented by absence
//! from the state map. All transitions happen here; the session only calls
//! in from its single control flow, so no locking is involved.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::budget::PointBudgetManager;
use crate::hierarchy::{NodeDescriptor, NodeKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Queued,
    /// Carries the admitted point estimate so completion can settle the
    /// budget without a second hierarchy lookup.
    Loading { estimated: u64 },
    Loaded,
    Failed,
}

/// How one in-flight fetch ended.
pub enum FetchOutcome {
    /// Decoded successfully with this many points.
    Loaded { actual: u64 },
    /// Bytes arrived but would not decode. Terminal for the node.
    DecodeFailed,
    /// The fetch itself failed. The node becomes eligible again.
    NetworkFailed,
}

/// One scheduling pass's pull from the queue.
pub struct NextBatch {
    pub start: Vec<NodeDescriptor>,
    /// True when the budget refused at least one node during the pass.
    pub budget_exhausted: bool,
}

struct QueueEntry {
    distance_sq: f64,
    node: NodeDescriptor,
}

/// Max-heap inverted so the nearest (then shallowest) node pops first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance_sq
            .total_cmp(&self.distance_sq)
            .then_with(|| other.node.key.depth.cmp(&self.node.key.depth))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

#[derive(Default)]
pub struct FetchScheduler {
    states: HashMap<NodeKey, NodeState>,
    queue: BinaryHeap<QueueEntry>,
    in_flight: usize,
    loaded: u64,
    failed: u64,
}

impl FetchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &NodeKey) -> Option<NodeState> {
        self.states.get(key).copied()
    }

    /// True for nodes selection should not offer again right now. `Failed`
    /// is excluded on purpose: a later viewport may retry it.
    pub fn is_handled(&self, key: &NodeKey) -> bool {
        matches!(
            self.states.get(key),
            Some(NodeState::Queued | NodeState::Loading { .. } | NodeState::Loaded)
        )
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn loaded_count(&self) -> u64 {
        self.loaded
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    /// Queue a node for fetching. Nodes already queued, loading, or loaded
    /// are ignored; a previously failed node is allowed another attempt.
    pub fn enqueue(&mut self, node: NodeDescriptor, distance_sq: f64) {
        if self.is_handled(&node.key) {
            return;
        }
        self.states.insert(node.key, NodeState::Queued);
        self.queue.push(QueueEntry { distance_sq, node });
    }

    /// Return every still-queued node to `Unrequested` and empty the queue.
    /// Called when a new viewport supersedes the old selection; in-flight
    /// fetches are left to complete.
    pub fn clear_queue(&mut self) {
        for entry in self.queue.drain() {
            if self.states.get(&entry.node.key) == Some(&NodeState::Queued) {
                self.states.remove(&entry.node.key);
            }
        }
    }

    /// Pull nodes to start fetching, nearest first, until the concurrency
    /// limit stops the pass. The budget is re-checked per node: a refused
    /// node returns to `Unrequested`, but the scan continues, since a
    /// smaller node further down the queue may still fit under the cap.
    pub fn next_batch(
        &mut self,
        budget: &mut PointBudgetManager,
        max_concurrent: usize,
    ) -> NextBatch {
        let mut batch = NextBatch {
            start: Vec::new(),
            budget_exhausted: false,
        };

        while self.in_flight + batch.start.len() < max_concurrent {
            let Some(entry) = self.queue.pop() else { break };
            // Stale entries survive a clear/re-enqueue cycle; skip any
            // whose node is no longer queued.
            if self.states.get(&entry.node.key) != Some(&NodeState::Queued) {
                continue;
            }

            if !budget.admit(entry.node.point_count) {
                self.states.remove(&entry.node.key);
                batch.budget_exhausted = true;
                continue;
            }

            self.states.insert(
                entry.node.key,
                NodeState::Loading {
                    estimated: entry.node.point_count,
                },
            );
            batch.start.push(entry.node);
        }

        self.in_flight += batch.start.len();
        batch
    }

    /// Settle one in-flight fetch: update the state machine and the budget
    /// ledger together.
    pub fn complete(
        &mut self,
        key: NodeKey,
        outcome: FetchOutcome,
        budget: &mut PointBudgetManager,
    ) {
        let Some(NodeState::Loading { estimated }) = self.states.get(&key).copied() else {
            return;
        };
        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            FetchOutcome::Loaded { actual } => {
                budget.reconcile(estimated, actual);
                self.states.insert(key, NodeState::Loaded);
                self.loaded += 1;
            }
            FetchOutcome::DecodeFailed => {
                budget.release(estimated);
                self.states.insert(key, NodeState::Failed);
                self.failed += 1;
            }
            FetchOutcome::NetworkFailed => {
                budget.release(estimated);
                self.states.remove(&key);
            }
        }
    }
}
