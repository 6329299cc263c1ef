#![warn(missing_docs)]

//! iowarp: a small public API facade for the workspace.
//!
//! This crate re-exports the types most applications need:
//!
//! - Completion bridge (`Notifier`, `CompletionRecord`, `OperationToken`, ...)
//! - Receive-side packet accounting (`ReceivedPacketLedger`, `AckFrame`, ...)
//! - Core configuration, errors and clocks (`Config`, `ErrorKind`, `Clock`)
//!
//! Example
//! ```
//! use std::time::{Duration, Instant};
//! use iowarp::prelude::*;
//!
//! let mut notifier = Notifier::new();
//! notifier.set_handle(RawHandle(7));
//! notifier.set_enabled(true).unwrap();
//! notifier
//!     .completion_port()
//!     .post_completion(RawHandle(7), 128, 0, OperationToken(42))
//!     .unwrap();
//! assert_eq!(
//!     notifier.wait_for_any_notified(Some(Duration::from_secs(3))),
//!     Some(OperationToken(42))
//! );
//!
//! let mut ledger = ReceivedPacketLedger::default();
//! let now = Instant::now();
//! ledger.record_receipt(1, 0x11, now);
//! ledger.record_receipt(3, 0x33, now);
//! let frame = ledger.populate_ack_frame(now);
//! assert_eq!(frame.missing_ranges(), vec![2..=2]);
//! assert_eq!(frame.entropy_hash, 0x11 ^ 0x33);
//! ```

// Completion bridge
pub use iowarp_completion::{
    CompletionPort, CompletionRecord, DispatchService, Notifier, OperationToken,
    PendingResultQueue,
};
// Core config, errors and time
pub use iowarp_core::{
    config::Config,
    error::{ErrorKind, RawHandle, Result},
    time::{Clock, ManualClock, SystemClock},
};
// Receive-side packet accounting
pub use iowarp_protocol::{
    AckFrame, EntropyHash, PacketNumber, ReceiptStatistics, ReceivedPacketLedger,
    SequenceEntropyTracker, StopWaitingFrame,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        AckFrame, Clock, CompletionRecord, Config, ErrorKind, Notifier, OperationToken,
        RawHandle, ReceivedPacketLedger, StopWaitingFrame, SystemClock,
    };
}
