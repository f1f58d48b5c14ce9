//! Highest-sequence tracking for resumable push channels

/// Tracks the highest sequence number observed on a stream.
///
/// The value never decreases for the lifetime of a session. Zero means
/// nothing has been seen yet, which resumes "from now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last_seen: i64,
}

impl SequenceTracker {
    pub fn new(initial: i64) -> Self {
        Self {
            last_seen: initial.max(0),
        }
    }

    /// Record an observed sequence. Returns true if it advanced the tracker.
    pub fn observe(&mut self, sequence: i64) -> bool {
        if sequence > self.last_seen {
            self.last_seen = sequence;
            true
        } else {
            false
        }
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// Cursor to resume a push channel with; `None` when nothing was seen.
    pub fn resume_from(&self) -> Option<i64> {
        (self.last_seen > 0).then_some(self.last_seen)
    }
}
