#![warn(missing_docs)]

//! iowarp-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Time source abstraction
//!
//! The two engines live in specialized crates:
//! - `iowarp-completion`: completion port, dispatch thread and notifiers
//! - `iowarp-protocol`: entropy tracking and ack frame population

/// Constants shared across layers.
pub mod constants {
    /// Default name given to the background completion dispatch thread.
    pub const DEFAULT_DISPATCH_THREAD_NAME: &str = "iowarp-dispatch";
    /// The first valid packet number. Packet number 0 is never sent.
    pub const FIRST_PACKET_NUMBER: u64 = 1;
    /// How close (in packet numbers) the newest missing packet must be to the
    /// largest observed packet to count as a fresh loss.
    pub const MAX_PACKETS_AFTER_NEW_MISSING: u64 = 4;
    /// Maximum number of receipt timestamps carried by one ack frame.
    pub const MAX_RECEIVED_PACKET_TIMES: usize = 255;
    /// Furthest a received packet may land beyond the oldest packet still tracked.
    pub const MAX_TRACKED_PACKETS: u64 = 10_000;
}

/// Configuration options for the completion bridge and ack tracking.
pub mod config;
/// Error types and results.
pub mod error;
/// Time source abstraction.
pub mod time;
