//! Task frames and the public [`Task`] handle.
//!
//! A frame's ownership moves through a fixed handoff chain, never shared:
//!
//! 1. `Task::new` allocates the frame eagerly; the handle owns it. Nothing
//!    executes yet — tasks are lazy.
//! 2. Scheduling (top-level via [`Scheduler::schedule`], or as a child of an
//!    await) transfers ownership to the runtime; the handle is consumed.
//! 3. While in the ready queue the frame belongs to the scheduler; while
//!    being polled, to the worker holding the `RUNNING` transition; while
//!    suspended on I/O, to the outstanding operation.
//! 4. On completion it belongs to the await primitive that installed its
//!    continuation (which reads the result during the parent's resumption
//!    and releases it), or, with no continuation, to the completing worker.
//!
//! Every frame is released exactly once, at the end of whichever chain it is
//! on — including handles dropped before ever being scheduled.
//!
//! [`Scheduler::schedule`]: crate::Scheduler::schedule

use crate::error::Result;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::mem;

pub mod alloc;
pub use self::alloc::{FrameAllocator, SystemFrames};

mod harness;

mod header;
pub(crate) use self::header::Header;

mod join;
pub use self::join::{join_all, JoinAll, JoinOne};

mod layout;

mod raw;
pub(crate) use self::raw::RawTask;

pub(crate) mod state;

mod waker;

/// A lazily-started unit of scheduled computation producing a `Result<T>`.
///
/// Construction allocates the frame; execution begins only once the task is
/// scheduled and a worker resumes it. Awaiting a `Task` inside another task
/// consumes the handle (see [`join_all`] for batches); handing it to
/// [`Scheduler::schedule`](crate::Scheduler::schedule) makes it a top-level
/// task whose failure, if any, surfaces from
/// [`Scheduler::run`](crate::Scheduler::run).
pub struct Task<T> {
    raw: RawTask,
    _p: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task from `future`, framed through the system allocator.
    pub fn new<F>(future: F) -> Task<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Task::new_in(future, SystemFrames)
    }

    /// Creates a task whose frame lives in `alloc`.
    pub fn new_in<F, A>(future: F, alloc: A) -> Task<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        A: FrameAllocator,
    {
        Task {
            raw: RawTask::new::<T, F, A>(future, alloc),
            _p: PhantomData,
        }
    }

    /// Transfers frame ownership out of the handle.
    pub(crate) fn into_raw(self) -> RawTask {
        let raw = self.raw;
        mem::forget(self);
        raw
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        // Only reachable for handles that were never scheduled; scheduling
        // and awaiting both consume the handle without running this.
        self.raw.dealloc();
    }
}

impl<T: Send + 'static> IntoFuture for Task<T> {
    type Output = Result<T>;
    type IntoFuture = JoinOne<T>;

    /// Awaiting the handle is the await-one primitive: the calling task
    /// suspends, the child is scheduled, and the caller resumes with the
    /// child's result once it completes.
    fn into_future(self) -> JoinOne<T> {
        JoinOne::new(self.into_raw())
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({:p})", self.raw.header_ptr().as_ptr())
    }
}
