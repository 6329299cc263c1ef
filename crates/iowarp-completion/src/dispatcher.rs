//! Completion dispatch service.
//!
//! One background thread per service blocks on the completion port and routes every
//! completion to the queue of the notifier registered under its key. The process-wide
//! service is leased: the first [`DispatchService::acquire`] creates it, dropping the
//! last lease shuts the thread down.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use iowarp_core::{
    config::Config,
    error::{ErrorKind, Result},
};
use tracing::{debug, error, trace, warn};

use crate::{
    port::{CompletionPort, PortPacket, PortReceiver, PortStatus, RegistrationKey},
    queue::PendingResultQueue,
    record::CompletionRecord,
};

/// How often a drain request re-checks that the dispatch thread is still alive.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

static SERVICE: Mutex<Weak<DispatchService>> = Mutex::new(Weak::new());

/// State shared between the service handle and its dispatch thread.
struct Shared {
    registry: Mutex<HashMap<RegistrationKey, Arc<PendingResultQueue>>>,
    running: AtomicBool,
    drained_sender: Sender<()>,
    drained_receiver: Receiver<()>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<RegistrationKey, Arc<PendingResultQueue>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: RegistrationKey, record: CompletionRecord) {
        // The registry lock is held while enqueuing so that no record reaches a
        // notifier after its unregister call returned.
        let registry = self.registry();
        match registry.get(&key) {
            Some(queue) => queue.enqueue(record),
            None => trace!(
                "Dropping completion of {} for unregistered key {}",
                record.token,
                key
            ),
        }
    }
}

/// Background dispatcher owning a completion port.
pub struct DispatchService {
    port: CompletionPort,
    shared: Arc<Shared>,
    /// Consuming end of the port, until the dispatch thread takes it over.
    receiver: Mutex<Option<PortReceiver>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drain_lock: Mutex<()>,
    next_key: AtomicU64,
    thread_name: String,
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("port", &self.port)
            .field("registered", &self.registered_count())
            .field("running", &self.is_running())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

impl DispatchService {
    /// Returns a lease on the process-wide service, creating it if no lease is alive.
    ///
    /// The configuration is only read when the service gets created.
    pub fn acquire(config: &Config) -> Arc<Self> {
        let mut slot = SERVICE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(service) = slot.upgrade() {
            return service;
        }
        let service = Self::with_config(config);
        *slot = Arc::downgrade(&service);
        debug!("Created completion dispatch service");
        service
    }

    /// Number of live leases on the process-wide service.
    pub fn lease_count() -> usize {
        SERVICE.lock().unwrap_or_else(PoisonError::into_inner).strong_count()
    }

    /// Creates a standalone service, independent of the process-wide one.
    pub fn with_config(config: &Config) -> Arc<Self> {
        let (drained_sender, drained_receiver) = unbounded();
        let (port, receiver) = CompletionPort::channel(config.completion_queue_capacity);
        Arc::new(Self {
            port,
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                drained_sender,
                drained_receiver,
            }),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            drain_lock: Mutex::new(()),
            next_key: AtomicU64::new(1),
            thread_name: config.dispatch_thread_name.clone(),
        })
    }

    /// The port served by this service.
    pub fn port(&self) -> &CompletionPort {
        &self.port
    }

    /// Returns true while the dispatch thread is alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of registered notifier queues.
    pub fn registered_count(&self) -> usize {
        self.shared.registry().len()
    }

    pub(crate) fn allocate_key(&self) -> RegistrationKey {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Routes completions for `key` into `queue`, starting the dispatch thread if needed.
    pub fn register(&self, key: RegistrationKey, queue: Arc<PendingResultQueue>) -> Result<()> {
        self.shared.registry().insert(key, queue);
        if let Err(err) = self.ensure_running() {
            self.shared.registry().remove(&key);
            return Err(err);
        }
        Ok(())
    }

    /// Stops routing completions for `key`. Returns false if it was not registered.
    pub fn unregister(&self, key: RegistrationKey) -> bool {
        self.shared.registry().remove(&key).is_some()
    }

    /// Blocks until every completion queued in the port at the time of the call has
    /// been routed to its notifier.
    pub fn drain(&self) {
        if !self.is_running() {
            return;
        }
        let _drain = self.drain_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = self.port.post_drain() {
            warn!("Could not request a completion port drain: {}", err);
            return;
        }
        loop {
            match self.shared.drained_receiver.recv_timeout(DRAIN_POLL_INTERVAL) {
                Ok(()) => return,
                Err(RecvTimeoutError::Timeout) if self.is_running() => continue,
                Err(_) => {
                    warn!("Dispatch thread stopped before the drain request was served");
                    return;
                }
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_running() {
            return Ok(());
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }
        // A dispatch thread that exited took the consuming end of the port with it.
        let Some(receiver) = self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take()
        else {
            error!("Completion port is closed; the dispatch thread cannot be restarted");
            return Err(ErrorKind::DispatcherUnavailable);
        };

        let shared = self.shared.clone();
        // Set before spawning so a waiter racing the first registration sees a live bridge.
        self.shared.running.store(true, Ordering::Release);
        match thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run_dispatch_loop(receiver, shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                debug!("Started completion dispatch thread '{}'", self.thread_name);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                error!("Failed to start completion dispatch thread: {}", err);
                Err(ErrorKind::DispatcherUnavailable)
            }
        }
    }
}

impl Drop for DispatchService {
    fn drop(&mut self) {
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = worker {
            if let Err(err) = self.port.post_shutdown() {
                error!("Could not stop completion dispatch thread: {}", err);
                return;
            }
            if handle.join().is_err() {
                error!("Completion dispatch thread panicked");
            }
            debug!("Stopped completion dispatch thread '{}'", self.thread_name);
        }
    }
}

fn run_dispatch_loop(receiver: PortReceiver, shared: Arc<Shared>) {
    let mut draining = false;
    loop {
        let timeout = if draining { Some(Duration::ZERO) } else { None };
        match receiver.get(timeout) {
            PortStatus::Packet(PortPacket::Completion { key, record }) => {
                shared.notify(key, record)
            }
            PortStatus::Packet(PortPacket::Drain) => draining = true,
            PortStatus::Packet(PortPacket::Shutdown) => break,
            PortStatus::Empty | PortStatus::TimedOut => {
                if draining {
                    draining = false;
                    let _ = shared.drained_sender.send(());
                }
            }
            PortStatus::Closed => {
                error!("Completion port closed under the dispatch thread");
                break;
            }
        }
    }
    shared.running.store(false, Ordering::Release);
}
