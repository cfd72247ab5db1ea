//! Typed session events.

/// Progress and budget notifications dispatched through the session's
/// single event callback. Decoded points travel separately through the
/// points callback; events carry only counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Emitted after every node completion.
    Progress {
        loaded: u64,
        failed: u64,
        queued: usize,
        in_flight: usize,
        points_used: u64,
    },
    /// Emitted at most once per scheduling pass, when the point budget
    /// refuses a node.
    BudgetReached { used: u64, max: u64 },
}
