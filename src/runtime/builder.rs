use crate::queue::ReadyQueue;
use crate::runtime::scheduler::{Config, Scheduler, Shared, ThreadNameFn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Ready-queue capacity when none is configured. Larger reduces contention
/// at the cost of memory.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

fn default_worker_count() -> usize {
    thread::available_parallelism().map(usize::from).unwrap_or(1)
}

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(1));
    Arc::new(move || {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        format!("weft-worker-{n}")
    })
}

/// Configures and constructs a [`Scheduler`].
pub struct Builder {
    worker_threads: Option<usize>,
    queue_capacity: usize,
    thread_name: ThreadNameFn,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: default_thread_name_fn(),
        }
    }

    /// Sets the number of worker threads. The thread that calls
    /// [`Scheduler::run`] is one of them; `val - 1` additional threads are
    /// spawned. Defaults to the machine's available parallelism.
    ///
    /// # Panics
    ///
    /// Panics if `val` is zero.
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the ready-queue capacity (rounded up to a power of two).
    /// Defaults to 1024; must be at least the worker count.
    ///
    /// # Panics
    ///
    /// Panics if `val` is zero.
    pub fn queue_capacity(mut self, val: usize) -> Self {
        assert!(val > 0, "queue capacity cannot be set to 0");
        self.queue_capacity = val;
        self
    }

    /// Sets the name for spawned worker threads. The default yields
    /// `weft-worker-{N}` with monotonically increasing N.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = Arc::new(move || val.clone());
        self
    }

    /// Builds the scheduler.
    ///
    /// # Panics
    ///
    /// Panics if the queue capacity is smaller than the worker count.
    pub fn build(self) -> Scheduler {
        let worker_threads = self.worker_threads.unwrap_or_else(default_worker_count);
        assert!(
            self.queue_capacity >= worker_threads,
            "queue capacity ({}) must be at least the worker count ({})",
            self.queue_capacity,
            worker_threads,
        );

        Scheduler::from_shared(Arc::new(Shared {
            ready: ReadyQueue::new(self.queue_capacity),
            in_flight: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            reactor: Mutex::new(None),
            cfg: Config {
                worker_threads,
                thread_name: self.thread_name,
            },
        }))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}
