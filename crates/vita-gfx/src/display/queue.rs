use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::driver::{DisplayCallback, DisplayData, SyncObjectHandle};

/// Bounded presentation queue serviced by a dedicated thread.
///
/// [`add_entry`](Self::add_entry) blocks while `max_pending` flips are
/// outstanding. An entry stays outstanding until the callback invoked for it
/// returns or panics. This is the only backpressure between the render loop
/// and the display.
pub struct DisplayQueue {
    shared: Arc<Shared>,
    sender: Option<Sender<Entry>>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    max_pending: usize,
    state: Mutex<QueueState>,
    retired: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: usize,
    high_water: usize,
    completed: u64,
}

struct Entry {
    old_sync: SyncObjectHandle,
    new_sync: SyncObjectHandle,
    data: DisplayData,
}

/// The queue thread has exited and no longer accepts entries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("display queue is closed")]
pub struct QueueClosed;

impl DisplayQueue {
    /// Spawns the queue thread.
    pub fn new(max_pending: usize, callback: DisplayCallback) -> std::io::Result<Self> {
        let max_pending = max_pending.max(1);
        let shared = Arc::new(Shared {
            max_pending,
            state: Mutex::new(QueueState::default()),
            retired: Condvar::new(),
        });
        let (sender, receiver) = crossbeam_channel::unbounded();

        let worker = thread::Builder::new()
            .name("display-queue".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_queue(&shared, &receiver, &callback)
            })?;

        log::debug!("display queue started (max pending {max_pending})");
        Ok(Self {
            shared,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queues a flip, blocking while the queue is full.
    pub fn add_entry(
        &self,
        old_sync: SyncObjectHandle,
        new_sync: SyncObjectHandle,
        data: DisplayData,
    ) -> Result<(), QueueClosed> {
        let sender = self.sender.as_ref().ok_or(QueueClosed)?;

        {
            let mut state = self.shared.lock();
            while state.pending >= self.shared.max_pending {
                state = self
                    .shared
                    .retired
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.pending += 1;
            state.high_water = state.high_water.max(state.pending);
        }

        if sender.send(Entry { old_sync, new_sync, data }).is_err() {
            let mut state = self.shared.lock();
            state.pending -= 1;
            self.shared.retired.notify_all();
            return Err(QueueClosed);
        }
        Ok(())
    }

    /// Blocks until every queued entry has been retired.
    pub fn finish(&self) {
        let mut state = self.shared.lock();
        while state.pending > 0 {
            state = self
                .shared
                .retired
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[inline]
    pub fn max_pending(&self) -> usize {
        self.shared.max_pending
    }

    /// Entries queued but not yet retired.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending
    }

    /// Largest number of entries ever outstanding at once.
    pub fn high_water_mark(&self) -> usize {
        self.shared.lock().high_water
    }

    /// Entries retired since the queue was created.
    pub fn completed(&self) -> u64 {
        self.shared.lock().completed
    }
}

impl Drop for DisplayQueue {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what is left and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("display queue thread panicked");
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_queue(shared: &Shared, receiver: &Receiver<Entry>, callback: &DisplayCallback) {
    for entry in receiver.iter() {
        log::trace!(
            "display flip {} -> {} ({})",
            entry.old_sync,
            entry.new_sync,
            entry.data.address
        );
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&entry.data))) {
            log::error!(
                "display callback panicked on {}: {}",
                entry.data.address,
                panic_message(payload.as_ref())
            );
        }

        let mut state = shared.lock();
        state.pending -= 1;
        state.completed += 1;
        shared.retired.notify_all();
    }
    log::debug!("display queue stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DeviceAddress;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn data(n: u64) -> DisplayData {
        DisplayData { address: DeviceAddress(0x1000 * n) }
    }

    const OLD: SyncObjectHandle = SyncObjectHandle(1);
    const NEW: SyncObjectHandle = SyncObjectHandle(2);

    #[test]
    fn entries_are_presented_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb: DisplayCallback = {
            let seen = seen.clone();
            Arc::new(move |d: &DisplayData| seen.lock().unwrap().push(d.address))
        };
        let queue = DisplayQueue::new(2, cb).unwrap();

        for n in 1..=5 {
            queue.add_entry(OLD, NEW, data(n)).unwrap();
        }
        queue.finish();

        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.completed(), 5);
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (1..=5).map(|n| data(n).address).collect::<Vec<_>>());
    }

    #[test]
    fn submission_blocks_at_max_pending() {
        // Each callback waits for a permit, so entries stay outstanding until released.
        let (permit_tx, permit_rx) = bounded::<()>(0);
        let cb: DisplayCallback = Arc::new(move |_: &DisplayData| {
            let _ = permit_rx.recv();
        });
        let queue = Arc::new(DisplayQueue::new(2, cb).unwrap());

        queue.add_entry(OLD, NEW, data(1)).unwrap();
        queue.add_entry(OLD, NEW, data(2)).unwrap();
        assert_eq!(queue.pending(), 2);

        let submitted = Arc::new(AtomicUsize::new(0));
        let submitter = {
            let queue = queue.clone();
            let submitted = submitted.clone();
            thread::spawn(move || {
                queue.add_entry(OLD, NEW, data(3)).unwrap();
                submitted.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(submitted.load(Ordering::SeqCst), 0, "third entry must block");
        assert_eq!(queue.pending(), 2);

        permit_tx.send(()).unwrap();
        submitter.join().unwrap();
        assert_eq!(submitted.load(Ordering::SeqCst), 1);

        permit_tx.send(()).unwrap();
        permit_tx.send(()).unwrap();
        queue.finish();

        assert_eq!(queue.completed(), 3);
        assert_eq!(queue.high_water_mark(), 2);
    }

    #[test]
    fn drop_drains_outstanding_entries() {
        let count = Arc::new(AtomicUsize::new(0));
        let cb: DisplayCallback = {
            let count = count.clone();
            Arc::new(move |_: &DisplayData| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let queue = DisplayQueue::new(3, cb).unwrap();
        for n in 0..3 {
            queue.add_entry(OLD, NEW, data(n)).unwrap();
        }
        drop(queue);

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_callback_still_retires_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cb: DisplayCallback = {
            let calls = calls.clone();
            Arc::new(move |d: &DisplayData| {
                calls.fetch_add(1, Ordering::SeqCst);
                if d.address == data(2).address {
                    panic!("flip rejected");
                }
            })
        };
        let queue = DisplayQueue::new(2, cb).unwrap();

        for n in 1..=4 {
            queue.add_entry(OLD, NEW, data(n)).unwrap();
        }
        queue.finish();

        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.completed(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // The worker survived, so later entries are still serviced.
        queue.add_entry(OLD, NEW, data(5)).unwrap();
        queue.finish();
        assert_eq!(queue.completed(), 5);
    }

    #[test]
    fn zero_max_pending_is_clamped_to_one() {
        let queue = DisplayQueue::new(0, Arc::new(|_: &DisplayData| {})).unwrap();
        assert_eq!(queue.max_pending(), 1);
        queue.add_entry(OLD, NEW, data(1)).unwrap();
        queue.finish();
        assert_eq!(queue.completed(), 1);
    }
}
