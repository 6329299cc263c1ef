#![warn(missing_docs)]

//! iowarp-completion: typed completion notifications over a completion port.
//!
//! Devices issue asynchronous reads and writes themselves and report each finished
//! operation to the port; a single dispatch thread routes the completions to the
//! per-handle [`Notifier`], where they can be waited on synchronously or picked up
//! from an event loop.

/// Lease-counted dispatch service and its background thread.
pub mod dispatcher;
/// Per-handle notifier facade.
pub mod notifier;
/// In-process completion port.
pub mod port;
/// Per-notifier queue of completion records.
pub mod queue;
/// Completion record and operation token types.
pub mod record;

pub use dispatcher::DispatchService;
pub use notifier::Notifier;
pub use port::{CompletionPort, RegistrationKey};
pub use queue::PendingResultQueue;
pub use record::{CompletionRecord, OperationToken};
