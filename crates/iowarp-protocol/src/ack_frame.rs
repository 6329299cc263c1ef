use std::{
    collections::BTreeSet,
    ops::RangeInclusive,
    time::{Duration, Instant},
};

use crate::{EntropyHash, PacketNumber};

/// Acknowledgment state handed to the retransmission layer.
///
/// Serialization is left to the caller; this only carries the values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckFrame {
    /// Largest packet number received, 0 if none.
    pub largest_observed: PacketNumber,
    /// Cumulative entropy of every received packet up to `largest_observed`.
    pub entropy_hash: EntropyHash,
    /// Time elapsed since `largest_observed` arrived. None before any packet arrived.
    pub delta_time_largest_observed: Option<Duration>,
    /// Packets still awaited below `largest_observed` that were neither received nor revived.
    pub missing_packets: BTreeSet<PacketNumber>,
    /// Packets reconstructed rather than received.
    pub revived_packets: BTreeSet<PacketNumber>,
    /// Receipt times of packets received since the previous ack frame.
    pub received_packet_times: Vec<(PacketNumber, Instant)>,
}

impl AckFrame {
    /// Returns true if, according to this frame, the peer still waits for `packet_number`.
    pub fn is_awaiting_packet(&self, packet_number: PacketNumber) -> bool {
        packet_number > self.largest_observed || self.missing_packets.contains(&packet_number)
    }

    /// Missing packets as inclusive ranges, in ascending order.
    pub fn missing_ranges(&self) -> Vec<RangeInclusive<PacketNumber>> {
        let mut ranges: Vec<RangeInclusive<PacketNumber>> = Vec::new();
        for &packet in &self.missing_packets {
            match ranges.last_mut() {
                Some(range) if *range.end() + 1 == packet => *range = *range.start()..=packet,
                _ => ranges.push(packet..=packet),
            }
        }
        ranges
    }
}

/// Sent by a peer to say it will not retransmit anything below `least_unacked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopWaitingFrame {
    /// Smallest packet number the peer may still retransmit.
    pub least_unacked: PacketNumber,
    /// Cumulative entropy of every packet the peer sent below `least_unacked`.
    pub entropy_hash: EntropyHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ranges_merge_neighbours() {
        let frame = AckFrame {
            largest_observed: 20,
            missing_packets: [2, 3, 4, 7, 9, 10, 15].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(frame.missing_ranges(), vec![2..=4, 7..=7, 9..=10, 15..=15]);
    }

    #[test]
    fn test_awaiting_packet() {
        let frame = AckFrame {
            largest_observed: 10,
            missing_packets: [4].into_iter().collect(),
            ..Default::default()
        };
        assert!(frame.is_awaiting_packet(4));
        assert!(frame.is_awaiting_packet(11));
        assert!(!frame.is_awaiting_packet(5));
        assert!(!frame.is_awaiting_packet(10));
    }
}
