//! Receipt statistics tracking.
//!
//! Counts received and revived packets and measures how far out of order packets
//! arrive, both in packet numbers and in time.

use std::time::Duration;

/// Statistics gathered by the received packet ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptStatistics {
    /// Total packets received directly
    pub packets_received: u64,
    /// Total packets reconstructed rather than received
    pub packets_revived: u64,
    /// Packets that arrived after a packet with a larger number
    pub packets_reordered: u64,
    /// Largest distance (in packet numbers) between a late packet and the largest observed
    pub max_sequence_reordering: u64,
    /// Largest delay between the largest observed packet and a late packet
    pub max_time_reordering: Duration,
}

impl ReceiptStatistics {
    /// Returns the share of received packets that arrived out of order (0.0 to 1.0).
    pub fn reordering_rate(&self) -> f32 {
        if self.packets_received == 0 {
            return 0.0;
        }
        self.packets_reordered as f32 / self.packets_received as f32
    }

    /// Folds one reordering sample into the running maxima.
    pub fn record_reordering(&mut self, distance: u64, delay: Duration) {
        self.packets_reordered += 1;
        self.max_sequence_reordering = self.max_sequence_reordering.max(distance);
        self.max_time_reordering = self.max_time_reordering.max(delay);
    }

    /// Resets all statistics counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
