use std::default::Default;

use crate::constants::{
    DEFAULT_DISPATCH_THREAD_NAME, MAX_PACKETS_AFTER_NEW_MISSING, MAX_RECEIVED_PACKET_TIMES,
    MAX_TRACKED_PACKETS,
};

#[derive(Clone, Debug)]
/// Configuration options to tune the completion bridge and the receive-side ack tracking.
pub struct Config {
    /// Name given to the background dispatch thread.
    pub dispatch_thread_name: String,
    /// Capacity of the completion port queue. None makes the queue unbounded.
    /// When bounded, posting a completion blocks until the dispatch thread catches up.
    pub completion_queue_capacity: Option<usize>,
    /// A missing packet counts as "new" while it is at most this many packet numbers
    /// below the largest observed packet.
    pub max_packets_after_new_missing: u64,
    /// Max number of receipt timestamps reported in a single ack frame.
    pub max_received_packet_times: usize,
    /// Packets numbered this far or further beyond the oldest packet still tracked are
    /// refused, bounding the missing set and the entropy window.
    pub max_tracked_packets: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch_thread_name: DEFAULT_DISPATCH_THREAD_NAME.to_string(),
            completion_queue_capacity: None, // Unbounded
            max_packets_after_new_missing: MAX_PACKETS_AFTER_NEW_MISSING,
            max_received_packet_times: MAX_RECEIVED_PACKET_TIMES,
            max_tracked_packets: MAX_TRACKED_PACKETS,
        }
    }
}
