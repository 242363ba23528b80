use crate::error::{fatal, Error, Result};
use crate::io::reactor::{Op, ReactorHandle};
use crate::queue::ReadyQueue;
use crate::runtime::worker::{self, Role};
use crate::runtime::Builder;
use crate::task::state::TransitionToNotified;
use crate::task::{RawTask, Task};
use anyhow::anyhow;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) type ThreadNameFn = Arc<dyn Fn() -> String + Send + Sync + 'static>;

pub(crate) struct Config {
    pub(super) worker_threads: usize,
    pub(super) thread_name: ThreadNameFn,
}

/// State shared by every worker, every frame's back-pointer, and the I/O
/// reactor.
pub(crate) struct Shared {
    /// Ready frames awaiting resumption, FIFO.
    pub(super) ready: ReadyQueue<RawTask>,

    /// Scheduled-but-not-completed task count. Incremented by `schedule`,
    /// decremented once per task on completion; zero marks the runtime idle
    /// and gates shutdown.
    pub(super) in_flight: AtomicUsize,

    /// First top-level task failure, surfaced from `run()`. Later failures
    /// are logged and discarded.
    pub(super) first_error: Mutex<Option<Error>>,

    /// Lazily-started I/O reactor.
    pub(super) reactor: Mutex<Option<ReactorHandle>>,

    pub(super) cfg: Config,
}

/// A handle to a multi-worker task scheduler.
///
/// Cheap to clone; all clones drive the same worker pool and ready queue.
/// Multiple schedulers may coexist — there is no global state, and every
/// frame carries a back-pointer to the scheduler that owns it.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler with `worker_threads` workers and default
    /// configuration. See [`Builder`] for the rest of the knobs.
    pub fn new(worker_threads: usize) -> Scheduler {
        Builder::new().worker_threads(worker_threads).build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Scheduler {
        Scheduler { shared }
    }

    /// Enqueues a task as a top-level task. Callable before [`run`] and from
    /// inside a running task.
    ///
    /// [`run`]: Scheduler::run
    pub fn schedule<T: Send + 'static>(&self, task: Task<T>) {
        Shared::schedule_frame(&self.shared, task.into_raw());
    }

    /// Enqueues a batch of top-level tasks.
    pub fn schedule_all<T: Send + 'static>(&self, tasks: impl IntoIterator<Item = Task<T>>) {
        for task in tasks {
            self.schedule(task);
        }
    }

    /// Runs the scheduler until every scheduled task has completed.
    ///
    /// The calling thread becomes a worker; `worker_threads - 1` additional
    /// workers are spawned for the duration of the call. Returns the first
    /// failure of a top-level task, if any.
    pub fn run(&self) -> Result<()> {
        let shared = &self.shared;
        let extra = shared.cfg.worker_threads - 1;

        tracing::debug!(
            target: "weft::runtime",
            workers = shared.cfg.worker_threads,
            "scheduler running"
        );

        let handles = (0..extra)
            .map(|_| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name((shared.cfg.thread_name)())
                    .spawn(move || worker::run(&shared, Role::Worker))
                    .expect("failed to spawn worker thread")
            })
            .collect::<Vec<_>>();

        // The driver participates until the very last task has completed;
        // workers bow out one task earlier (see `Role`).
        worker::run(shared, Role::Driver);

        let panicked = handles
            .into_iter()
            .map(|h| h.join())
            .filter(|r| r.is_err())
            .count();

        if panicked > 0 {
            return Err(Error::App(anyhow!("{panicked} worker thread(s) panicked")));
        }

        match self.shared.first_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Shared {
    /// Schedules a fresh frame: binds the scheduler back-pointer, counts it
    /// in flight, and publishes it to the ready queue.
    pub(crate) fn schedule_frame(this: &Arc<Shared>, raw: RawTask) {
        // Both writes land before the push publishes the frame.
        unsafe { raw.bind_scheduler(Arc::downgrade(this)) };
        this.in_flight.fetch_add(1, Ordering::AcqRel);

        if raw.state().transition_to_queued().is_err() {
            fatal("task frame scheduled twice");
        }
        this.push_ready(raw);
    }

    /// Re-enqueues a frame whose suspension condition has been satisfied
    /// externally (a completed child batch, or an I/O completion). Does not
    /// touch `in_flight` — the frame is already counted. Safe to call from
    /// any thread.
    pub(crate) fn schedule_wake(&self, raw: RawTask) {
        match raw.state().transition_to_notified() {
            TransitionToNotified::Submit => self.push_ready(raw),
            TransitionToNotified::DoNothing => {}
        }
    }

    /// Publishes a frame that already holds the `QUEUED` claim (the
    /// suspending worker converting a missed wake).
    pub(crate) fn requeue(&self, raw: RawTask) {
        self.push_ready(raw);
    }

    fn push_ready(&self, raw: RawTask) {
        if self.ready.push(raw).is_err() {
            fatal("ready queue overflow; raise queue_capacity");
        }
    }

    /// A task completed; drop its in-flight slot.
    pub(crate) fn release_task(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "in-flight count underflow");
    }

    /// Records a top-level task failure. The first one wins and is returned
    /// from `run()`; the rest are logged and dropped.
    pub(crate) fn record_task_error(&self, e: Error) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(e);
        } else {
            tracing::debug!(target: "weft::runtime", error = %e, "discarding subsequent top-level failure");
        }
    }

    /// Hands an operation to the I/O reactor, starting it on first use.
    pub(crate) fn submit_io(&self, op: Op) -> io::Result<()> {
        let mut slot = self.reactor.lock();
        if slot.is_none() {
            *slot = Some(ReactorHandle::start()?);
        }
        slot.as_ref().expect("reactor just started").submit(op)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Frames still queued were never started (run() drains everything it
        // begins); they are owned by the scheduler and released here.
        while let Some(raw) = self.ready.try_pop() {
            raw.dealloc();
        }

        if let Some(reactor) = self.reactor.lock().take() {
            reactor.shutdown();
        }
    }
}
