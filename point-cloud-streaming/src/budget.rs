//! Point budget accounting.
//!
//! Admission happens before a node's bytes are fetched, using the
//! hierarchy's declared point count as the estimate. Once the decoder
//! reports the real count the reservation is reconciled: over-estimates are
//! refunded, under-estimates accepted so the ledger matches loaded reality.

pub struct PointBudgetManager {
    max_points: u64,
    committed: u64,
}

impl PointBudgetManager {
    pub fn new(max_points: u64) -> Self {
        Self {
            max_points,
            committed: 0,
        }
    }

    pub fn max_points(&self) -> u64 {
        self.max_points
    }

    pub fn used(&self) -> u64 {
        self.committed
    }

    pub fn remaining(&self) -> u64 {
        self.max_points.saturating_sub(self.committed)
    }

    /// Reserve an estimated point count. A refusal leaves the ledger
    /// untouched.
    pub fn admit(&mut self, estimated: u64) -> bool {
        match self.committed.checked_add(estimated) {
            Some(total) if total <= self.max_points => {
                self.committed = total;
                true
            }
            _ => false,
        }
    }

    /// Replace a reservation with the decoder's actual count.
    pub fn reconcile(&mut self, estimated: u64, actual: u64) {
        self.committed = self.committed.saturating_sub(estimated).saturating_add(actual);
    }

    /// Return a reservation after a failed or abandoned fetch.
    pub fn release(&mut self, estimated: u64) {
        self.committed = self.committed.saturating_sub(estimated);
    }
}
