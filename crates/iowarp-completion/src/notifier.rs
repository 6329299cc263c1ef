use std::{sync::Arc, time::Duration};

use crossbeam_channel::Receiver;
use iowarp_core::{
    config::Config,
    error::{ErrorKind, RawHandle, Result},
};
use tracing::warn;

use crate::{
    dispatcher::DispatchService,
    port::{CompletionPort, RegistrationKey},
    queue::PendingResultQueue,
    record::{CompletionRecord, OperationToken},
};

/// Per-handle view of the completion bridge.
///
/// A notifier owns one platform handle. Once enabled, every operation completed on that
/// handle is queued here and can be consumed in two ways:
/// - synchronously, with [`Notifier::wait_for_any_notified`] or [`Notifier::wait_for_notified`];
/// - from an event loop, by selecting on [`Notifier::wake_receiver`] and calling
///   [`Notifier::process_wakeup`] for each wake-up.
///
/// Either way each dispatched record is also published on the [`Notifier::notified`]
/// channels, in the order the port reported the completions.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use iowarp_completion::{Notifier, OperationToken};
/// use iowarp_core::error::RawHandle;
///
/// let mut notifier = Notifier::new();
/// notifier.set_handle(RawHandle(0x5eed));
/// notifier.set_enabled(true).unwrap();
///
/// // The device layer reports a finished 512 byte read.
/// notifier
///     .completion_port()
///     .post_completion(RawHandle(0x5eed), 512, 0, OperationToken(1))
///     .unwrap();
///
/// assert!(notifier.wait_for_notified(Some(Duration::from_secs(3)), OperationToken(1)));
/// ```
pub struct Notifier {
    handle: Option<RawHandle>,
    key: RegistrationKey,
    enabled: bool,
    associated: bool,
    queue: Arc<PendingResultQueue>,
    service: Arc<DispatchService>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("handle", &self.handle)
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .field("queue", &self.queue)
            .finish()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Creates a notifier served by the process-wide dispatch service.
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Creates a notifier served by the process-wide dispatch service, creating the
    /// service with `config` if no other notifier is alive.
    pub fn with_config(config: &Config) -> Self {
        Self::with_service(DispatchService::acquire(config))
    }

    /// Creates a notifier served by a specific dispatch service.
    pub fn with_service(service: Arc<DispatchService>) -> Self {
        Self {
            handle: None,
            key: service.allocate_key(),
            enabled: false,
            associated: false,
            queue: Arc::new(PendingResultQueue::new()),
            service,
        }
    }

    /// Assigns the platform handle. Must happen before the notifier is first enabled.
    pub fn set_handle(&mut self, handle: RawHandle) {
        if self.associated {
            warn!(
                "Ignoring handle change to {}: notifier is already bound to {:?}",
                handle, self.handle
            );
            return;
        }
        self.handle = Some(handle);
    }

    /// Returns the platform handle, if one was assigned.
    pub fn handle(&self) -> Option<RawHandle> {
        self.handle
    }

    /// Starts or stops routing completions of the handle to this notifier.
    ///
    /// Enabling associates the handle with the completion port the first time and starts
    /// the dispatch thread if needed. Disabling is idempotent; completions that arrive
    /// while disabled are dropped.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if !enabled {
            if self.enabled {
                self.service.unregister(self.key);
                self.enabled = false;
            }
            return Ok(());
        }
        if self.enabled {
            return Ok(());
        }

        let handle = self.handle.ok_or(ErrorKind::NotifierHandleMissing)?;
        if !self.associated {
            if let Err(err) = self.service.port().associate(handle, self.key) {
                warn!("Refusing to enable notifier: {}", err);
                return Err(err);
            }
            self.associated = true;
        }
        self.service.register(self.key, self.queue.clone())?;
        self.enabled = true;
        Ok(())
    }

    /// Returns true while completions are routed to this notifier.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Waits for the next completed operation on this handle and returns its token.
    ///
    /// `None` waits forever. A zero timeout first makes the dispatch thread empty the
    /// completion port, so a completion the OS already reported is never missed by an
    /// immediate poll. Returns `None` on timeout or when the bridge is inactive.
    pub fn wait_for_any_notified(&self, timeout: Option<Duration>) -> Option<OperationToken> {
        if !self.is_active("wait_for_any_notified") {
            return None;
        }
        let _waiting = self.queue.begin_wait();
        if timeout.map_or(false, |t| t.is_zero()) {
            self.service.drain();
        }
        self.queue.wait_any(timeout).map(|record| record.token)
    }

    /// Waits for the completion of one specific operation.
    ///
    /// Completions of other operations arriving in the meantime stay queued for later
    /// calls. Returns false if the timeout elapsed first or the bridge is inactive.
    pub fn wait_for_notified(&self, timeout: Option<Duration>, token: OperationToken) -> bool {
        if !self.is_active("wait_for_notified") {
            return false;
        }
        let _waiting = self.queue.begin_wait();
        if timeout.map_or(false, |t| t.is_zero()) {
            self.service.drain();
        }
        self.queue.wait_token(timeout, token)
    }

    /// Returns a channel receiving every record this notifier dispatches.
    pub fn notified(&self) -> Receiver<CompletionRecord> {
        self.queue.subscribe()
    }

    /// Channel receiving one wake-up per completion queued while no synchronous
    /// waiter was blocked. Select on it from the owning event loop.
    pub fn wake_receiver(&self) -> Receiver<()> {
        self.queue.wake_receiver().clone()
    }

    /// Handles one wake-up: dispatches the next queued record, if a synchronous waiter
    /// has not taken it already. Never blocks.
    pub fn process_wakeup(&self) -> Option<CompletionRecord> {
        self.queue.dispatch_next()
    }

    /// The completion port the device layer reports this handle's completions to.
    pub fn completion_port(&self) -> CompletionPort {
        self.service.port().clone()
    }

    /// Number of completions queued but not yet dispatched.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn is_active(&self, operation: &str) -> bool {
        if !self.service.is_running() {
            warn!("Called {} on an inactive notifier: dispatch thread is not running", operation);
            return false;
        }
        if !self.enabled && self.queue.is_empty() {
            warn!("Called {} on a disabled notifier with nothing queued", operation);
            return false;
        }
        true
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        let _ = self.set_enabled(false);
        // The notifier owns the handle: once it is gone the OS may hand the value out again.
        if let (true, Some(handle)) = (self.associated, self.handle) {
            self.service.port().close_handle(handle);
        }
    }
}
