use std::{collections::BTreeSet, time::Instant};

use iowarp_core::{config::Config, constants::FIRST_PACKET_NUMBER};
use tracing::{debug, trace, warn};

use crate::{
    ack_frame::{AckFrame, StopWaitingFrame},
    entropy::SequenceEntropyTracker,
    statistics::ReceiptStatistics,
    EntropyHash, PacketNumber,
};

/// Receive-side bookkeeping for one connection.
///
/// Fed by the packet receipt pipeline, one call per arriving (or reconstructed) packet;
/// read back by the retransmission layer through [`ReceivedPacketLedger::populate_ack_frame`].
/// Single-threaded: the owning connection serializes every call.
#[derive(Debug, Clone)]
pub struct ReceivedPacketLedger {
    entropy: SequenceEntropyTracker,
    largest_observed: PacketNumber,
    time_largest_observed: Option<Instant>,
    /// Awaited packets below `largest_observed` that were not received. Includes revived ones.
    missing: BTreeSet<PacketNumber>,
    revived: BTreeSet<PacketNumber>,
    received_packet_times: Vec<(PacketNumber, Instant)>,
    /// Everything below this packet number is no longer of interest.
    least_awaited: PacketNumber,
    ack_updated: bool,
    stats: ReceiptStatistics,
    max_packets_after_new_missing: u64,
    max_received_packet_times: usize,
    max_tracked_packets: u64,
}

impl Default for ReceivedPacketLedger {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl ReceivedPacketLedger {
    /// Creates an empty ledger.
    pub fn new(config: &Config) -> Self {
        Self {
            entropy: SequenceEntropyTracker::new(),
            largest_observed: 0,
            time_largest_observed: None,
            missing: BTreeSet::new(),
            revived: BTreeSet::new(),
            received_packet_times: Vec::new(),
            least_awaited: FIRST_PACKET_NUMBER,
            ack_updated: false,
            stats: ReceiptStatistics::default(),
            max_packets_after_new_missing: config.max_packets_after_new_missing,
            max_received_packet_times: config.max_received_packet_times,
            max_tracked_packets: config.max_tracked_packets,
        }
    }

    /// Records a packet received directly. Returns false if the packet was not awaited
    /// (duplicate, or below the low-water mark) or lies too far ahead of the oldest
    /// tracked packet, and was ignored.
    pub fn record_receipt(
        &mut self,
        packet_number: PacketNumber,
        entropy_hash: EntropyHash,
        receipt_time: Instant,
    ) -> bool {
        if !self.is_awaiting_packet(packet_number) {
            debug!("Ignoring packet {}: not awaited", packet_number);
            return false;
        }
        let oldest_tracked = self.least_awaited.min(self.entropy.first_gap());
        if packet_number - oldest_tracked >= self.max_tracked_packets {
            warn!(
                "Refusing packet {}: more than {} packets beyond {}",
                packet_number, self.max_tracked_packets, oldest_tracked
            );
            return false;
        }

        let gap_start = (self.largest_observed + 1).max(self.least_awaited);
        self.missing.extend(gap_start..packet_number);

        if packet_number < self.largest_observed {
            let delay = self
                .time_largest_observed
                .map(|largest_time| receipt_time.saturating_duration_since(largest_time))
                .unwrap_or_default();
            self.stats.record_reordering(self.largest_observed - packet_number, delay);
            trace!(
                "Packet {} arrived {} behind {} ({:?} late)",
                packet_number,
                self.largest_observed - packet_number,
                self.largest_observed,
                delay
            );
        }
        if packet_number > self.largest_observed {
            self.largest_observed = packet_number;
            self.time_largest_observed = Some(receipt_time);
        }

        self.entropy.record(packet_number, entropy_hash);
        self.missing.remove(&packet_number);
        // Received takes precedence over revived.
        self.revived.remove(&packet_number);
        self.received_packet_times.push((packet_number, receipt_time));
        self.stats.packets_received += 1;
        self.ack_updated = true;
        true
    }

    /// Records a packet that was reconstructed instead of received. Returns false if the
    /// packet was not awaited.
    pub fn record_revived(&mut self, packet_number: PacketNumber) -> bool {
        if !self.is_awaiting_packet(packet_number) {
            debug!("Ignoring revived packet {}: not awaited", packet_number);
            return false;
        }
        if self.revived.insert(packet_number) {
            self.stats.packets_revived += 1;
            self.ack_updated = true;
        }
        true
    }

    /// Returns true if `packet_number` can still arrive and matter.
    pub fn is_awaiting_packet(&self, packet_number: PacketNumber) -> bool {
        packet_number >= self.least_awaited
            && (packet_number > self.largest_observed || self.missing.contains(&packet_number))
    }

    /// Returns true if `packet_number` is below the largest observed packet and was
    /// neither received nor revived.
    pub fn is_missing(&self, packet_number: PacketNumber) -> bool {
        self.missing.contains(&packet_number) && !self.revived.contains(&packet_number)
    }

    /// Cumulative entropy of every received packet up to `packet_number`.
    pub fn entropy_hash(&self, packet_number: PacketNumber) -> EntropyHash {
        self.entropy.cumulative_hash(packet_number)
    }

    /// Builds the ack frame describing the current receive state.
    ///
    /// The delta since the largest observed packet arrived is never negative, even when
    /// `now` is earlier than the recorded receipt time. Receipt times are reported once:
    /// they are cleared by this call.
    pub fn populate_ack_frame(&mut self, now: Instant) -> AckFrame {
        self.ack_updated = false;

        let skipped =
            self.received_packet_times.len().saturating_sub(self.max_received_packet_times);
        let received_packet_times = self.received_packet_times.drain(..).skip(skipped).collect();

        AckFrame {
            largest_observed: self.largest_observed,
            entropy_hash: self.entropy.cumulative_hash(self.largest_observed),
            delta_time_largest_observed: self
                .time_largest_observed
                .map(|largest_time| now.saturating_duration_since(largest_time)),
            missing_packets: self.missing.difference(&self.revived).copied().collect(),
            revived_packets: self.revived.clone(),
            received_packet_times,
        }
    }

    /// Stops waiting for every packet below `least_awaited`. Returns true if the
    /// low-water mark moved forward.
    pub fn advance_low_water_mark(&mut self, least_awaited: PacketNumber) -> bool {
        if least_awaited <= self.least_awaited {
            return false;
        }
        self.least_awaited = least_awaited;

        let missing_before = self.missing.len();
        self.missing = self.missing.split_off(&least_awaited);
        self.revived = self.revived.split_off(&least_awaited);
        if self.missing.len() != missing_before {
            self.ack_updated = true;
        }
        true
    }

    /// Applies a peer's stop-waiting frame.
    ///
    /// If packets below `least_unacked` were given up on, the entropy they would have
    /// contributed is unknown, so the peer's cumulative value replaces ours.
    pub fn update_from_stop_waiting(&mut self, frame: StopWaitingFrame) {
        let gave_up = self.missing.range(..frame.least_unacked).next().is_some();
        if !self.advance_low_water_mark(frame.least_unacked) {
            return;
        }
        if gave_up {
            debug!(
                "Resetting entropy up to {} after giving up on missing packets",
                frame.least_unacked - 1
            );
            self.entropy.set_cumulative_up_to(frame.least_unacked - 1, frame.entropy_hash);
        }
    }

    /// Returns true if the newest missing packet is recent enough to deserve a prompt ack.
    pub fn has_new_missing_packets(&self) -> bool {
        self.missing
            .iter()
            .rev()
            .find(|packet| !self.revived.contains(packet))
            .map_or(false, |&newest| {
                self.largest_observed - newest <= self.max_packets_after_new_missing
            })
    }

    /// Returns true if the receive state changed since the last ack frame was built.
    pub fn ack_frame_updated(&self) -> bool {
        self.ack_updated
    }

    /// The largest packet number received so far, 0 if none.
    pub fn largest_observed(&self) -> PacketNumber {
        self.largest_observed
    }

    /// Lowest packet number still of interest.
    pub fn least_awaited(&self) -> PacketNumber {
        self.least_awaited
    }

    /// Receipt and reordering statistics.
    pub fn stats(&self) -> &ReceiptStatistics {
        &self.stats
    }

    /// The underlying entropy tracker.
    pub fn entropy_tracker(&self) -> &SequenceEntropyTracker {
        &self.entropy
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ledger() -> ReceivedPacketLedger {
        ReceivedPacketLedger::default()
    }

    #[test]
    fn test_missing_packets_between_receipts() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(1, 0, now);
        ledger.record_receipt(5, 0, now);

        assert!(ledger.is_missing(2));
        assert!(ledger.is_missing(4));
        assert!(!ledger.is_missing(5));
        assert!(ledger.is_awaiting_packet(3));
        assert!(ledger.is_awaiting_packet(6));
        assert!(!ledger.is_awaiting_packet(1));

        let frame = ledger.populate_ack_frame(now);
        assert_eq!(frame.largest_observed, 5);
        assert_eq!(frame.missing_packets, [2, 3, 4].into_iter().collect());
    }

    #[test]
    fn test_duplicate_receipt_is_ignored() {
        let mut ledger = ledger();
        let now = Instant::now();
        assert!(ledger.record_receipt(1, 7, now));
        assert!(!ledger.record_receipt(1, 7, now));
        assert_eq!(ledger.stats().packets_received, 1);
        assert_eq!(ledger.entropy_hash(1), 7);
    }

    #[test]
    fn test_reordering_statistics() {
        let mut ledger = ledger();
        let start = Instant::now();
        ledger.record_receipt(1, 0, start);
        ledger.record_receipt(6, 0, start + Duration::from_millis(10));
        ledger.record_receipt(3, 0, start + Duration::from_millis(25));
        ledger.record_receipt(5, 0, start + Duration::from_millis(12));

        let stats = ledger.stats();
        assert_eq!(stats.packets_received, 4);
        assert_eq!(stats.packets_reordered, 2);
        assert_eq!(stats.max_sequence_reordering, 3);
        assert_eq!(stats.max_time_reordering, Duration::from_millis(15));
    }

    #[test]
    fn test_late_packet_with_earlier_timestamp_clamps_delay() {
        let mut ledger = ledger();
        let start = Instant::now();
        ledger.record_receipt(4, 0, start + Duration::from_millis(50));
        ledger.record_receipt(2, 0, start);

        assert_eq!(ledger.stats().max_sequence_reordering, 2);
        assert_eq!(ledger.stats().max_time_reordering, Duration::ZERO);
    }

    #[test]
    fn test_revived_packets_reported_separately() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(1, 0, now);
        ledger.record_receipt(5, 0, now);
        assert!(ledger.record_revived(3));

        let frame = ledger.populate_ack_frame(now);
        assert_eq!(frame.missing_packets, [2, 4].into_iter().collect());
        assert_eq!(frame.revived_packets, [3].into_iter().collect());
        assert_eq!(ledger.stats().packets_revived, 1);
        // Revived packets can still be received.
        assert!(ledger.is_awaiting_packet(3));
    }

    #[test]
    fn test_receipt_clears_revived_mark() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(4, 0, now);
        ledger.record_revived(2);
        ledger.record_receipt(2, 9, now);

        let frame = ledger.populate_ack_frame(now);
        assert!(frame.revived_packets.is_empty());
        assert_eq!(frame.missing_packets, [1, 3].into_iter().collect());
        assert!(!ledger.is_awaiting_packet(2));
    }

    #[test]
    fn test_revived_not_awaited_is_refused() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(1, 0, now);
        assert!(!ledger.record_revived(1));
        assert_eq!(ledger.stats().packets_revived, 0);
    }

    #[test]
    fn test_delta_time_never_negative() {
        let mut ledger = ledger();
        let start = Instant::now();
        assert_eq!(ledger.populate_ack_frame(start).delta_time_largest_observed, None);

        ledger.record_receipt(1, 0, start + Duration::from_millis(20));
        let frame = ledger.populate_ack_frame(start);
        assert_eq!(frame.delta_time_largest_observed, Some(Duration::ZERO));

        let frame = ledger.populate_ack_frame(start + Duration::from_millis(35));
        assert_eq!(frame.delta_time_largest_observed, Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_receipt_times_reported_once_and_capped() {
        let mut config = Config::default();
        config.max_received_packet_times = 2;
        let mut ledger = ReceivedPacketLedger::new(&config);
        let now = Instant::now();
        for packet in 1..=4 {
            ledger.record_receipt(packet, 0, now);
        }

        let frame = ledger.populate_ack_frame(now);
        let reported: Vec<PacketNumber> =
            frame.received_packet_times.iter().map(|(packet, _)| *packet).collect();
        assert_eq!(reported, vec![3, 4]);
        assert!(ledger.populate_ack_frame(now).received_packet_times.is_empty());
    }

    #[test]
    fn test_ack_frame_entropy_matches_tracker() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(2, 5, now);
        ledger.record_receipt(5, 17, now);
        ledger.record_receipt(1, 2, now);

        let frame = ledger.populate_ack_frame(now);
        assert_eq!(frame.entropy_hash, 2 ^ 5 ^ 17);
        assert_eq!(ledger.entropy_tracker().first_gap(), 3);
    }

    #[test]
    fn test_advance_low_water_mark() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(10, 0, now);

        assert!(ledger.advance_low_water_mark(5));
        assert!(!ledger.advance_low_water_mark(5));
        assert!(!ledger.advance_low_water_mark(3));
        assert_eq!(ledger.least_awaited(), 5);

        assert!(!ledger.is_awaiting_packet(4));
        assert!(ledger.is_awaiting_packet(6));
        let frame = ledger.populate_ack_frame(now);
        assert_eq!(frame.missing_packets, (5..10).collect());
    }

    #[test]
    fn test_receipt_below_low_water_mark_is_ignored() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.advance_low_water_mark(10);
        assert!(!ledger.record_receipt(9, 0, now));
        assert!(ledger.record_receipt(12, 0, now));

        let frame = ledger.populate_ack_frame(now);
        assert_eq!(frame.missing_packets, [10, 11].into_iter().collect());
    }

    #[test]
    fn test_stop_waiting_resets_entropy_after_giving_up() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(1, 1, now);
        ledger.record_receipt(4, 8, now);
        ledger.record_receipt(6, 32, now);

        ledger.update_from_stop_waiting(StopWaitingFrame { least_unacked: 5, entropy_hash: 0x40 });

        // 2 and 3 are given up; the peer's value covers everything through 4.
        assert_eq!(ledger.entropy_hash(4), 0x40);
        assert_eq!(ledger.entropy_hash(6), 0x40 ^ 32);
        assert!(ledger.is_missing(5));
        assert!(!ledger.is_missing(3));
    }

    #[test]
    fn test_stop_waiting_without_losses_keeps_entropy() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(1, 1, now);
        ledger.record_receipt(2, 2, now);

        ledger.update_from_stop_waiting(StopWaitingFrame { least_unacked: 3, entropy_hash: 0xff });
        assert_eq!(ledger.entropy_hash(2), 1 ^ 2);
        assert_eq!(ledger.least_awaited(), 3);
    }

    #[test]
    fn test_packet_far_ahead_of_window_is_refused() {
        let mut config = Config::default();
        config.max_tracked_packets = 100;
        let mut ledger = ReceivedPacketLedger::new(&config);
        let now = Instant::now();

        assert!(ledger.record_receipt(1, 0, now));
        assert!(!ledger.record_receipt(u64::MAX, 0, now));
        assert!(!ledger.record_receipt(101, 0, now));
        assert_eq!(ledger.largest_observed(), 1);
        assert!(ledger.populate_ack_frame(now).missing_packets.is_empty());

        assert!(ledger.record_receipt(100, 0, now));
        assert_eq!(ledger.populate_ack_frame(now).missing_packets.len(), 98);
    }

    #[test]
    fn test_window_limit_follows_oldest_unfilled_gap() {
        let mut config = Config::default();
        config.max_tracked_packets = 100;
        let mut ledger = ReceivedPacketLedger::new(&config);
        let now = Instant::now();

        ledger.record_receipt(50, 0, now);
        // Giving up on 1..50 without a stop-waiting frame leaves the entropy gap at 1.
        ledger.advance_low_water_mark(40);
        assert!(!ledger.record_receipt(101, 0, now));

        ledger.update_from_stop_waiting(StopWaitingFrame { least_unacked: 45, entropy_hash: 0 });
        assert!(ledger.record_receipt(101, 0, now));
    }

    #[test]
    fn test_has_new_missing_packets() {
        let mut ledger = ledger();
        let now = Instant::now();
        ledger.record_receipt(1, 0, now);
        assert!(!ledger.has_new_missing_packets());

        ledger.record_receipt(3, 0, now);
        assert!(ledger.has_new_missing_packets());

        ledger.record_receipt(10, 0, now);
        // newest missing is 9, right behind 10
        assert!(ledger.has_new_missing_packets());

        for packet in 4..=9 {
            ledger.record_receipt(packet, 0, now);
        }
        // only 2 is missing, 8 behind the largest observed
        assert!(!ledger.has_new_missing_packets());
    }

    #[test]
    fn test_ack_frame_updated_flag() {
        let mut ledger = ledger();
        let now = Instant::now();
        assert!(!ledger.ack_frame_updated());
        ledger.record_receipt(1, 0, now);
        assert!(ledger.ack_frame_updated());
        ledger.populate_ack_frame(now);
        assert!(!ledger.ack_frame_updated());
    }
}
