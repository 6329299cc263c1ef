//! Sliding-window entropy tracking.
//!
//! Packets can arrive in any order. The tracker keeps one slot per packet number between
//! the first gap (the lowest packet not yet seen) and the largest observed packet; every
//! contiguous run of received packets at the front of that window is folded into a single
//! cumulative value and dropped, so memory follows the width of the unfilled region.

use std::collections::VecDeque;

use iowarp_core::constants::FIRST_PACKET_NUMBER;
use tracing::{debug, warn};

use crate::{EntropyHash, PacketNumber};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Entry {
    value: EntropyHash,
    /// false for a gap: the packet has not been seen yet.
    tracked: bool,
}

/// Cumulative entropy of every received packet, over a window that only spans the gaps.
#[derive(Clone, Debug)]
pub struct SequenceEntropyTracker {
    /// XOR of every packet below `first_gap`.
    base: EntropyHash,
    /// Slot `i` holds packet `first_gap + i`. The front slot is always a gap.
    entries: VecDeque<Entry>,
    first_gap: PacketNumber,
    largest_observed: PacketNumber,
}

impl Default for SequenceEntropyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceEntropyTracker {
    /// Creates an empty tracker. No packet has been observed and the first gap is the
    /// first valid packet number.
    pub fn new() -> Self {
        Self {
            base: 0,
            entries: VecDeque::new(),
            first_gap: FIRST_PACKET_NUMBER,
            largest_observed: FIRST_PACKET_NUMBER - 1,
        }
    }

    /// The lowest packet number not yet accounted for.
    pub fn first_gap(&self) -> PacketNumber {
        self.first_gap
    }

    /// The largest packet number seen so far, 0 before any packet.
    pub fn largest_observed(&self) -> PacketNumber {
        self.largest_observed
    }

    /// Number of slots in the window, gaps included.
    pub fn window_len(&self) -> usize {
        self.entries.len()
    }

    /// Number of individually tracked packets in the window.
    pub fn tracked_len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.tracked).count()
    }

    /// Records the entropy of packet `packet_number`.
    ///
    /// Packets below the first gap are already folded and are ignored. Recording a
    /// packet that is already tracked replaces its value. Filling the first gap folds
    /// every contiguous tracked packet behind it.
    ///
    /// The window grows to reach `packet_number`, one slot per packet number, so callers
    /// must bound how far ahead of [`Self::first_gap`] they record.
    /// [`crate::ReceivedPacketLedger`] refuses packets beyond its `max_tracked_packets`.
    pub fn record(&mut self, packet_number: PacketNumber, entropy_hash: EntropyHash) {
        if packet_number < self.first_gap {
            debug!(
                "Ignoring entropy of packet {}: folded through {}",
                packet_number,
                self.first_gap - 1
            );
            return;
        }
        let Ok(index) = usize::try_from(packet_number - self.first_gap) else {
            warn!("Ignoring entropy of packet {}: window would not fit in memory", packet_number);
            return;
        };

        self.largest_observed = self.largest_observed.max(packet_number);

        // In order with nothing outstanding.
        if index == 0 && self.entries.is_empty() {
            self.base ^= entropy_hash;
            self.first_gap += 1;
            return;
        }

        if index >= self.entries.len() {
            self.entries.resize(index + 1, Entry::default());
        }
        self.entries[index] = Entry { value: entropy_hash, tracked: true };
        self.fold_contiguous();
    }

    /// Declares that the XOR of the entropy of every packet up to and including
    /// `packet_number` is `entropy_hash`.
    ///
    /// The individual values below `packet_number` are no longer needed and get dropped.
    /// When `packet_number` is below the first gap the call is ignored: the folded value
    /// already covers that range. Otherwise the last call wins.
    pub fn set_cumulative_up_to(&mut self, packet_number: PacketNumber, entropy_hash: EntropyHash) {
        if packet_number < self.first_gap {
            debug!(
                "Ignoring cumulative entropy up to {}: already folded through {}",
                packet_number,
                self.first_gap - 1
            );
            return;
        }

        let covered = packet_number - self.first_gap + 1;
        let window = self.entries.len();
        let dropped = usize::try_from(covered).map_or(window, |covered| covered.min(window));
        self.entries.drain(..dropped);

        self.base = entropy_hash;
        self.first_gap = packet_number + 1;
        self.largest_observed = self.largest_observed.max(packet_number);
        self.fold_contiguous();
    }

    /// XOR of the entropy of every received packet up to and including `packet_number`.
    pub fn cumulative_hash(&self, packet_number: PacketNumber) -> EntropyHash {
        if packet_number < self.first_gap {
            return self.base;
        }
        let span = usize::try_from(packet_number - self.first_gap)
            .map_or(usize::MAX, |offset| offset.saturating_add(1));
        self.entries
            .iter()
            .take(span)
            .filter(|entry| entry.tracked)
            .fold(self.base, |hash, entry| hash ^ entry.value)
    }

    /// Returns true if `packet_number` is inside the window and individually tracked.
    pub fn is_tracking(&self, packet_number: PacketNumber) -> bool {
        if packet_number < self.first_gap {
            return false;
        }
        usize::try_from(packet_number - self.first_gap)
            .ok()
            .and_then(|index| self.entries.get(index))
            .map_or(false, |entry| entry.tracked)
    }

    fn fold_contiguous(&mut self) {
        while let Some(entry) = self.entries.front() {
            if !entry.tracked {
                break;
            }
            self.base ^= entry.value;
            self.first_gap += 1;
            self.entries.pop_front();
        }
    }
}
