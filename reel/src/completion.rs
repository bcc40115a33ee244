//! Completion accounting for weighted streams.
//!
//! A stream is complete once its terminal marker has been seen and the weight received over
//! its data batches matches the declared total. Trackers do no I/O and are owned by a single
//! control loop, so they carry no synchronization.

use metrics::counter;
use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, ReelResult};
use crate::metrics::{REEL_PROTOCOL_VIOLATIONS_TOTAL, VIOLATION_LABEL};
use crate::types::{BatchKind, Header};

/// Outcome of feeding a batch into a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The stream is not complete yet.
    Pending,
    /// This registration completed the stream. Reported exactly once per tracker.
    Completed,
    /// The stream was already complete before this registration.
    AlreadyComplete,
}

impl Progress {
    pub fn is_completed(&self) -> bool {
        matches!(self, Progress::Completed)
    }
}

/// Tracks received weight against the total declared by the terminal marker of one stream.
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
    received: u64,
    declared_total: Option<u32>,
    completion_reported: bool,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the weight of a data batch.
    pub fn register_data(&mut self, weight: u32) -> Progress {
        self.received += u64::from(weight);

        if let Some(total) = self.declared_total
            && self.received > u64::from(total)
        {
            warn!(
                received = self.received,
                declared_total = total,
                "received weight exceeds the declared total"
            );
            counter!(REEL_PROTOCOL_VIOLATIONS_TOTAL, VIOLATION_LABEL => "weight_overflow")
                .increment(1);
        }

        self.progress()
    }

    /// Fails when the stream already declared its total, so a second terminal marker can be
    /// refused before anything downstream sees it.
    pub fn check_terminal(&self, total: u32) -> ReelResult<()> {
        if let Some(declared_total) = self.declared_total {
            counter!(REEL_PROTOCOL_VIOLATIONS_TOTAL, VIOLATION_LABEL => "duplicate_terminal")
                .increment(1);

            bail!(
                ErrorKind::ProtocolViolation,
                "Duplicate terminal marker",
                format!("stream already declared a total of {declared_total}, got {total}")
            );
        }

        Ok(())
    }

    /// Records the total declared by the terminal marker.
    ///
    /// A second terminal marker is rejected and never overwrites the first total.
    pub fn register_terminal(&mut self, total: u32) -> ReelResult<Progress> {
        self.check_terminal(total)?;

        if self.received > u64::from(total) {
            warn!(
                received = self.received,
                declared_total = total,
                "terminal marker declares less weight than already received"
            );
            counter!(REEL_PROTOCOL_VIOLATIONS_TOTAL, VIOLATION_LABEL => "weight_overflow")
                .increment(1);
        }

        self.declared_total = Some(total);

        Ok(self.progress())
    }

    /// Feeds a batch header into the tracker according to its kind.
    ///
    /// Cleanup markers carry no accounting information and leave the tracker untouched.
    pub fn register(&mut self, header: &Header) -> ReelResult<Progress> {
        match header.kind() {
            BatchKind::Data => Ok(self.register_data(header.weight)),
            BatchKind::Terminal { total } => {
                self.check_terminal(total)?;

                if header.weight > 0 {
                    warn!(
                        weight = header.weight,
                        "terminal marker carries weight, accounting it as data"
                    );
                    self.register_data(header.weight);
                }

                self.register_terminal(total)
            }
            BatchKind::Cleanup => Ok(self.progress()),
        }
    }

    /// Returns `true` when the terminal marker was seen and the received weight matches it.
    pub fn is_complete(&self) -> bool {
        self.declared_total
            .is_some_and(|total| self.received == u64::from(total))
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn declared_total(&self) -> Option<u32> {
        self.declared_total
    }

    fn progress(&mut self) -> Progress {
        if self.completion_reported {
            return Progress::AlreadyComplete;
        }

        if self.is_complete() {
            self.completion_reported = true;
            return Progress::Completed;
        }

        Progress::Pending
    }
}

/// Tracks one logical stream produced in parts by several upstream shards.
///
/// Every shard sends its own terminal marker. The stream is complete once all shards have
/// declared their totals and the combined received weight equals the sum of those totals.
#[derive(Debug, Clone)]
pub struct ShardCompletionTracker {
    expected_shards: u16,
    terminals_seen: u16,
    declared_total: u64,
    received: u64,
    completion_reported: bool,
}

impl ShardCompletionTracker {
    pub fn new(expected_shards: u16) -> Self {
        Self {
            expected_shards,
            terminals_seen: 0,
            declared_total: 0,
            received: 0,
            completion_reported: false,
        }
    }

    pub fn register_data(&mut self, weight: u32) -> Progress {
        self.received += u64::from(weight);
        self.progress()
    }

    /// Records the total declared by the terminal marker of one shard.
    ///
    /// More terminal markers than shards is a protocol violation and the extra total is ignored.
    pub fn register_terminal(&mut self, total: u32) -> ReelResult<Progress> {
        self.check_terminal(total)?;

        self.terminals_seen += 1;
        self.declared_total += u64::from(total);

        Ok(self.progress())
    }

    fn check_terminal(&self, total: u32) -> ReelResult<()> {
        if self.terminals_seen >= self.expected_shards {
            counter!(REEL_PROTOCOL_VIOLATIONS_TOTAL, VIOLATION_LABEL => "duplicate_terminal")
                .increment(1);

            bail!(
                ErrorKind::ProtocolViolation,
                "More terminal markers than upstream shards",
                format!(
                    "expected {} shards, got an extra terminal declaring {total}",
                    self.expected_shards
                )
            );
        }

        Ok(())
    }

    pub fn register(&mut self, header: &Header) -> ReelResult<Progress> {
        match header.kind() {
            BatchKind::Data => Ok(self.register_data(header.weight)),
            BatchKind::Terminal { total } => {
                self.check_terminal(total)?;

                if header.weight > 0 {
                    self.register_data(header.weight);
                }

                self.register_terminal(total)
            }
            BatchKind::Cleanup => Ok(self.progress()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.terminals_seen == self.expected_shards && self.received == self.declared_total
    }

    pub fn terminals_seen(&self) -> u16 {
        self.terminals_seen
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    fn progress(&mut self) -> Progress {
        if self.completion_reported {
            return Progress::AlreadyComplete;
        }

        if self.is_complete() {
            self.completion_reported = true;
            return Progress::Completed;
        }

        Progress::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientId;

    fn count_completions(tracker: &mut CompletionTracker, weights: &[u32], total: u32) -> usize {
        let mut completions = 0;
        for weight in weights {
            if tracker.register_data(*weight).is_completed() {
                completions += 1;
            }
        }
        if tracker.register_terminal(total).unwrap().is_completed() {
            completions += 1;
        }
        completions
    }

    #[test]
    fn completes_once_after_terminal_and_full_weight() {
        let mut tracker = CompletionTracker::new();

        assert_eq!(tracker.register_data(2), Progress::Pending);
        assert_eq!(tracker.register_data(3), Progress::Pending);
        assert!(!tracker.is_complete());
        assert_eq!(tracker.register_terminal(5).unwrap(), Progress::Completed);
        assert!(tracker.is_complete());
        assert_eq!(tracker.register_data(0), Progress::AlreadyComplete);
    }

    #[test]
    fn terminal_before_data_completes_on_last_batch() {
        let mut tracker = CompletionTracker::new();

        assert_eq!(tracker.register_terminal(4).unwrap(), Progress::Pending);
        assert_eq!(tracker.register_data(1), Progress::Pending);
        assert_eq!(tracker.register_data(3), Progress::Completed);
        assert!(tracker.is_complete());
    }

    #[test]
    fn completion_fires_exactly_once_for_any_data_order() {
        let orders: [&[u32]; 4] = [&[1, 2, 3], &[3, 2, 1], &[2, 3, 1], &[6]];

        for order in orders {
            let mut tracker = CompletionTracker::new();
            assert_eq!(count_completions(&mut tracker, order, 6), 1);
            assert!(tracker.is_complete());
        }

        // Terminal arriving in the middle of the data batches.
        let mut tracker = CompletionTracker::new();
        tracker.register_data(3);
        assert_eq!(tracker.register_terminal(6).unwrap(), Progress::Pending);
        assert_eq!(tracker.register_data(1), Progress::Pending);
        assert_eq!(tracker.register_data(2), Progress::Completed);
    }

    #[test]
    fn duplicate_terminal_is_rejected_and_keeps_first_total() {
        let mut tracker = CompletionTracker::new();
        tracker.register_terminal(3).unwrap();

        let err = tracker.register_terminal(9).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(tracker.declared_total(), Some(3));
    }

    #[test]
    fn duplicate_weighted_terminal_leaves_received_weight_untouched() {
        let client_id = ClientId::new("c1");
        let mut tracker = CompletionTracker::new();
        tracker.register(&Header::terminal(client_id.clone(), 3)).unwrap();

        let mut duplicate = Header::terminal(client_id, 3);
        duplicate.weight = 2;
        let err = tracker.register(&duplicate).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(tracker.received(), 0);
        assert_eq!(tracker.declared_total(), Some(3));
    }

    #[test]
    fn overflowing_weight_is_not_complete() {
        let mut tracker = CompletionTracker::new();
        tracker.register_terminal(2).unwrap();
        tracker.register_data(3);

        assert!(!tracker.is_complete());
        assert_eq!(tracker.received(), 3);
    }

    #[test]
    fn register_dispatches_on_header_kind() {
        let client_id = ClientId::new("c1");
        let mut tracker = CompletionTracker::new();

        tracker.register(&Header::data(client_id.clone(), 2)).unwrap();
        tracker.register(&Header::cleanup(client_id.clone())).unwrap();
        let progress = tracker.register(&Header::terminal(client_id, 2)).unwrap();

        assert_eq!(progress, Progress::Completed);
    }

    #[test]
    fn shard_tracker_waits_for_every_shard_terminal() {
        let mut tracker = ShardCompletionTracker::new(2);

        tracker.register_data(3);
        // The first shard alone is fully received but the second shard has not declared yet.
        assert_eq!(tracker.register_terminal(3).unwrap(), Progress::Pending);
        assert_eq!(tracker.register_data(3), Progress::Pending);
        assert_eq!(tracker.register_terminal(3).unwrap(), Progress::Completed);
        assert!(tracker.is_complete());
    }

    #[test]
    fn shard_tracker_rejects_extra_terminals() {
        let mut tracker = ShardCompletionTracker::new(1);
        tracker.register_terminal(1).unwrap();

        let err = tracker.register_terminal(1).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(tracker.terminals_seen(), 1);
    }

    #[test]
    fn shard_tracker_extra_weighted_terminal_is_not_accounted() {
        let client_id = ClientId::new("c1");
        let mut tracker = ShardCompletionTracker::new(1);
        tracker.register(&Header::terminal(client_id.clone(), 1)).unwrap();

        let mut extra = Header::terminal(client_id, 1);
        extra.weight = 1;

        assert!(tracker.register(&extra).is_err());
        assert_eq!(tracker.received(), 0);
    }
}
