//! In-process completion port.
//!
//! Models the OS primitive the bridge sits on: a single queue into which completed
//! operations are posted, each tagged with the registration key its handle was
//! associated with. A handle stays associated until it is closed. The consuming end
//! belongs to the dispatch thread; once that thread exits, the port is closed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use iowarp_core::error::{ErrorKind, RawHandle, Result};

use crate::record::{CompletionRecord, OperationToken};

/// Key a handle is associated with; identifies the notifier the completion belongs to.
pub type RegistrationKey = u64;

/// Packet travelling through the completion port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PortPacket {
    /// An operation on an associated handle completed.
    Completion { key: RegistrationKey, record: CompletionRecord },
    /// Asks the dispatch thread to empty the port and report back.
    Drain,
    /// Asks the dispatch thread to exit.
    Shutdown,
}

/// Result of dequeuing from the port.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PortStatus {
    Packet(PortPacket),
    /// Zero-timeout poll found nothing queued.
    Empty,
    /// Timed wait elapsed without a packet.
    TimedOut,
    /// Every port handle is gone; the port can never produce another packet.
    Closed,
}

struct PortInner {
    sender: Sender<PortPacket>,
    associations: Mutex<HashMap<RawHandle, RegistrationKey>>,
}

/// Consuming end of a completion port.
pub(crate) struct PortReceiver {
    receiver: Receiver<PortPacket>,
}

/// Cloneable handle to a completion port.
///
/// Devices post completions for associated handles with [`CompletionPort::post_completion`];
/// the dispatch thread is the only consumer.
#[derive(Clone)]
pub struct CompletionPort {
    inner: Arc<PortInner>,
}

impl std::fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPort")
            .field("queued", &self.inner.sender.len())
            .field("associations", &self.associated_count())
            .finish()
    }
}

impl CompletionPort {
    /// Creates a port and its consuming end. `capacity` bounds the number of queued
    /// packets; None is unbounded.
    pub(crate) fn channel(capacity: Option<usize>) -> (Self, PortReceiver) {
        let (sender, receiver) = match capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let port = Self {
            inner: Arc::new(PortInner { sender, associations: Mutex::new(HashMap::new()) }),
        };
        (port, PortReceiver { receiver })
    }

    /// Associates `handle` with `key`. A handle can only ever be associated once.
    pub(crate) fn associate(&self, handle: RawHandle, key: RegistrationKey) -> Result<()> {
        let mut associations =
            self.inner.associations.lock().unwrap_or_else(PoisonError::into_inner);
        if associations.contains_key(&handle) {
            return Err(ErrorKind::HandleAlreadyAssociated(handle));
        }
        associations.insert(handle, key);
        Ok(())
    }

    /// Returns true if `handle` is currently associated with this port.
    pub fn is_associated(&self, handle: RawHandle) -> bool {
        self.inner
            .associations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle)
    }

    /// Returns the number of associated handles.
    pub fn associated_count(&self) -> usize {
        self.inner.associations.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Ends the lifetime of `handle`, removing its association.
    ///
    /// Completions already queued for it are still delivered (or dropped) by the
    /// dispatch thread. Returns false if the handle was not associated.
    pub fn close_handle(&self, handle: RawHandle) -> bool {
        self.inner
            .associations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some()
    }

    /// Reports that an operation issued on `handle` completed.
    ///
    /// This is the device side of the contract: whatever issued the read or write
    /// calls this once the operation finishes. Fails with [`ErrorKind::PortClosed`] once
    /// the dispatch thread consuming the port has exited.
    pub fn post_completion(
        &self,
        handle: RawHandle,
        bytes_transferred: u64,
        error_code: u32,
        token: OperationToken,
    ) -> Result<()> {
        let key = self
            .inner
            .associations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .copied()
            .ok_or(ErrorKind::HandleNotAssociated(handle))?;
        self.post(PortPacket::Completion {
            key,
            record: CompletionRecord::new(bytes_transferred, error_code, token),
        })
    }

    pub(crate) fn post_drain(&self) -> Result<()> {
        self.post(PortPacket::Drain)
    }

    pub(crate) fn post_shutdown(&self) -> Result<()> {
        self.post(PortPacket::Shutdown)
    }

    /// Number of packets waiting in the port.
    pub fn queued(&self) -> usize {
        self.inner.sender.len()
    }

    fn post(&self, packet: PortPacket) -> Result<()> {
        self.inner.sender.send(packet).map_err(|_| ErrorKind::PortClosed)
    }

}

impl PortReceiver {
    /// Dequeues the next packet. `None` blocks indefinitely, a zero timeout polls.
    pub(crate) fn get(&self, timeout: Option<Duration>) -> PortStatus {
        match timeout {
            None => match self.receiver.recv() {
                Ok(packet) => PortStatus::Packet(packet),
                Err(_) => PortStatus::Closed,
            },
            Some(timeout) if timeout.is_zero() => match self.receiver.try_recv() {
                Ok(packet) => PortStatus::Packet(packet),
                Err(TryRecvError::Empty) => PortStatus::Empty,
                Err(TryRecvError::Disconnected) => PortStatus::Closed,
            },
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(packet) => PortStatus::Packet(packet),
                Err(RecvTimeoutError::Timeout) => PortStatus::TimedOut,
                Err(RecvTimeoutError::Disconnected) => PortStatus::Closed,
            },
        }
    }
}
