//! Per-notifier queue of completion records.
//!
//! The dispatch thread appends records; any thread may take them back out, either
//! by blocking on the queue (synchronous waiters) or in response to a wake-up
//! delivered to the owning event loop.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::record::{CompletionRecord, OperationToken};

#[derive(Debug, Default)]
struct Pending {
    results: VecDeque<CompletionRecord>,
    /// Threads blocked in a synchronous wait.
    waiters: usize,
    /// Records enqueued while a waiter was blocked, so without a wake-up of their own.
    suppressed: usize,
}

/// FIFO of completion records paired with a counting signal.
///
/// The signal's count is the number of queued but undelivered records: the
/// condition variable is notified once per enqueued record and waiters re-check the
/// queue length under the lock.
///
/// Every record is eventually announced to the owning event loop, unless a synchronous
/// waiter takes it first: wake-ups held back while a waiter is blocked are posted once
/// the last waiter leaves, for as many records as are still queued.
pub struct PendingResultQueue {
    pending: Mutex<Pending>,
    available: Condvar,
    wake_sender: Sender<()>,
    wake_receiver: Receiver<()>,
    listeners: Mutex<Vec<Sender<CompletionRecord>>>,
}

impl std::fmt::Debug for PendingResultQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.lock_pending();
        f.debug_struct("PendingResultQueue")
            .field("pending", &pending.results.len())
            .field("waiters", &pending.waiters)
            .field("suppressed", &pending.suppressed)
            .field("pending_wakeups", &self.wake_receiver.len())
            .finish()
    }
}

impl Default for PendingResultQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks a synchronous waiter for as long as it is alive.
pub(crate) struct WaitGuard<'a> {
    queue: &'a PendingResultQueue,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.queue.lock_pending();
        pending.waiters -= 1;
        if pending.waiters > 0 {
            return;
        }
        let owed = pending.suppressed.min(pending.results.len());
        pending.suppressed = 0;
        for _ in 0..owed {
            let _ = self.queue.wake_sender.send(());
        }
    }
}

impl PendingResultQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (wake_sender, wake_receiver) = unbounded();
        Self {
            pending: Mutex::new(Pending::default()),
            available: Condvar::new(),
            wake_sender,
            wake_receiver,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Appends a record and signals its availability.
    ///
    /// The owning loop gets a wake-up right away when no synchronous waiter is blocked;
    /// otherwise the wake-up is held back until the waiters are gone.
    pub fn enqueue(&self, record: CompletionRecord) {
        let mut pending = self.lock_pending();
        pending.results.push_back(record);
        if pending.waiters == 0 {
            let _ = self.wake_sender.send(());
        } else {
            pending.suppressed += 1;
        }
        drop(pending);
        // notify_all: a waiter for a specific token may not be the one this record is for
        self.available.notify_all();
    }

    /// Pops the front record, publishes it to the listeners and returns it.
    pub fn dispatch_next(&self) -> Option<CompletionRecord> {
        let record = self.lock_pending().results.pop_front()?;
        self.publish(record);
        Some(record)
    }

    /// Blocks until any record is queued or the timeout elapses. `None` waits forever.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Option<CompletionRecord> {
        let record = self.wait_until(timeout, |results| results.pop_front())?;
        self.publish(record);
        Some(record)
    }

    /// Blocks until the record for `token` is queued or the timeout elapses.
    ///
    /// Only the matching record is taken; records for other operations that complete
    /// in the meantime stay queued, in order, for later consumers.
    pub fn wait_token(&self, timeout: Option<Duration>, token: OperationToken) -> bool {
        let taken = self.wait_until(timeout, |results| {
            let position = results.iter().position(|record| record.token == token)?;
            results.remove(position)
        });
        match taken {
            Some(record) => {
                self.publish(record);
                true
            }
            None => false,
        }
    }

    /// Registers the caller as a synchronous waiter until the guard is dropped.
    pub(crate) fn begin_wait(&self) -> WaitGuard<'_> {
        self.lock_pending().waiters += 1;
        WaitGuard { queue: self }
    }

    /// Number of threads currently blocked in a synchronous wait.
    pub fn waiters(&self) -> usize {
        self.lock_pending().waiters
    }

    /// Returns a receiver that gets every record this queue hands out.
    pub fn subscribe(&self) -> Receiver<CompletionRecord> {
        let (sender, receiver) = unbounded();
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).push(sender);
        receiver
    }

    /// Receiver of the "new data" wake-ups meant for the owning event loop.
    pub fn wake_receiver(&self) -> &Receiver<()> {
        &self.wake_receiver
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.lock_pending().results.len()
    }

    /// Returns true if no record is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wait_until<F>(&self, timeout: Option<Duration>, mut take: F) -> Option<CompletionRecord>
    where
        F: FnMut(&mut VecDeque<CompletionRecord>) -> Option<CompletionRecord>,
    {
        // An unrepresentable deadline is as good as waiting forever.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let forever = timeout.is_none() || deadline.is_none();

        let mut pending = self.lock_pending();
        loop {
            if let Some(record) = take(&mut pending.results) {
                // A held-back wake-up was meant for this record, or for one still queued.
                pending.suppressed = pending.suppressed.saturating_sub(1);
                return Some(record);
            }
            if forever {
                pending = self.available.wait(pending).unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            let remaining = deadline?.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            pending = self
                .available
                .wait_timeout(pending, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn publish(&self, record: CompletionRecord) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|listener| listener.send(record).is_ok());
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn record(token: usize) -> CompletionRecord {
        CompletionRecord::new(token as u64 * 10, 0, OperationToken(token))
    }

    #[test]
    fn test_records_come_out_in_order() {
        let queue = PendingResultQueue::new();
        queue.enqueue(record(1));
        queue.enqueue(record(2));
        queue.enqueue(record(3));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dispatch_next(), Some(record(1)));
        assert_eq!(queue.wait_any(Some(Duration::ZERO)), Some(record(2)));
        assert_eq!(queue.wait_any(None), Some(record(3)));
        assert!(queue.is_empty());
        assert_eq!(queue.dispatch_next(), None);
    }

    #[test]
    fn test_wait_any_times_out_on_empty_queue() {
        let queue = PendingResultQueue::new();
        let start = Instant::now();
        assert_eq!(queue.wait_any(Some(Duration::from_millis(20))), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_token_leaves_other_records_queued() {
        let queue = PendingResultQueue::new();
        queue.enqueue(record(1));
        queue.enqueue(record(2));
        queue.enqueue(record(3));

        assert!(queue.wait_token(Some(Duration::ZERO), OperationToken(2)));
        assert!(!queue.wait_token(Some(Duration::ZERO), OperationToken(2)));
        assert_eq!(queue.dispatch_next(), Some(record(1)));
        assert_eq!(queue.dispatch_next(), Some(record(3)));
    }

    #[test]
    fn test_blocked_waiter_is_woken_by_enqueue() {
        let queue = Arc::new(PendingResultQueue::new());
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.enqueue(record(7));
        });

        let _guard = queue.begin_wait();
        assert_eq!(queue.wait_any(Some(Duration::from_secs(3))), Some(record(7)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wakeup_suppressed_while_waiter_is_blocked() {
        let queue = PendingResultQueue::new();

        queue.enqueue(record(1));
        assert_eq!(queue.wake_receiver().len(), 1);

        {
            let _guard = queue.begin_wait();
            assert_eq!(queue.waiters(), 1);
            queue.enqueue(record(2));
            assert_eq!(queue.wake_receiver().len(), 1);
        }
        assert_eq!(queue.waiters(), 0);
        // Nobody took record 2, so its wake-up is owed once the waiter is gone.
        assert_eq!(queue.wake_receiver().len(), 2);
    }

    #[test]
    fn test_record_skipped_by_token_waiter_still_wakes_loop() {
        let queue = PendingResultQueue::new();
        {
            let _guard = queue.begin_wait();
            queue.enqueue(record(1));
            queue.enqueue(record(2));
            assert!(queue.wait_token(Some(Duration::ZERO), OperationToken(2)));
            assert!(queue.wake_receiver().is_empty());
        }

        assert_eq!(queue.wake_receiver().len(), 1);
        queue.wake_receiver().try_recv().unwrap();
        assert_eq!(queue.dispatch_next(), Some(record(1)));
    }

    #[test]
    fn test_record_taken_by_waiter_owes_no_wakeup() {
        let queue = PendingResultQueue::new();
        {
            let _guard = queue.begin_wait();
            queue.enqueue(record(1));
            assert_eq!(queue.wait_any(Some(Duration::ZERO)), Some(record(1)));
        }
        assert!(queue.wake_receiver().is_empty());
    }

    #[test]
    fn test_wakeups_owed_only_after_last_waiter_leaves() {
        let queue = PendingResultQueue::new();
        let first = queue.begin_wait();
        let second = queue.begin_wait();
        queue.enqueue(record(1));

        drop(first);
        assert!(queue.wake_receiver().is_empty());
        drop(second);
        assert_eq!(queue.wake_receiver().len(), 1);
    }

    #[test]
    fn test_listeners_see_every_delivered_record() {
        let queue = PendingResultQueue::new();
        let listener = queue.subscribe();

        queue.enqueue(record(1));
        queue.enqueue(record(2));
        queue.dispatch_next();
        queue.wait_token(None, OperationToken(2));

        let seen: Vec<_> = listener.try_iter().map(|r| r.token).collect();
        assert_eq!(seen, vec![OperationToken(1), OperationToken(2)]);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let queue = PendingResultQueue::new();
        drop(queue.subscribe());
        queue.enqueue(record(1));
        assert_eq!(queue.dispatch_next(), Some(record(1)));
        assert!(queue.listeners.lock().unwrap().is_empty());
    }
}
