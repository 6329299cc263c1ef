#![warn(missing_docs)]

//! iowarp-protocol: receive-side packet accounting.
//!
//! Tracks which packet numbers arrived, folds their entropy into a cumulative hash over
//! a sliding window, and builds the ack frames handed to the retransmission layer.

/// Ack and stop-waiting frame contents.
pub mod ack_frame;
/// Sliding-window entropy tracking.
pub mod entropy;
/// Received packet bookkeeping and ack frame population.
pub mod received;
/// Receipt and reordering statistics.
pub mod statistics;

/// Monotonically increasing packet number. Valid packet numbers start at 1.
pub type PacketNumber = u64;

/// Per-packet entropy value; combined with XOR, so order of arrival does not matter.
pub type EntropyHash = u8;

pub use ack_frame::{AckFrame, StopWaitingFrame};
pub use entropy::SequenceEntropyTracker;
pub use received::ReceivedPacketLedger;
pub use statistics::ReceiptStatistics;
