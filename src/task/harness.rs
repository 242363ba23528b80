//! Typed view over a raw frame: polling, completion accounting, teardown.

use crate::error::{Error, Result};
use crate::task::alloc::FrameAllocator;
use crate::task::layout::{Cell, Core, Stage};
use crate::task::raw::RawTask;
use crate::task::state::{TransitionToIdle, TransitionToRunning};
use crate::task::waker::waker_ref;
use crate::task::Header;
use std::alloc::Layout;
use std::future::Future;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};

pub(super) struct Harness<T, F: Future, A: FrameAllocator> {
    cell: NonNull<Cell<F, A>>,
    _p: PhantomData<T>,
}

impl<T, F, A> Harness<T, F, A>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    A: FrameAllocator,
{
    pub(super) unsafe fn from_raw(ptr: NonNull<Header>) -> Harness<T, F, A> {
        Harness {
            cell: ptr.cast::<Cell<F, A>>(),
            _p: PhantomData,
        }
    }

    fn header_ptr(&self) -> NonNull<Header> {
        self.cell.cast()
    }

    fn header(&self) -> &Header {
        unsafe { &self.cell.as_ref().header }
    }

    fn core(&self) -> &Core<F> {
        unsafe { &self.cell.as_ref().core }
    }

    /// Resumes the frame once. All state transitions around the poll are
    /// performed here; a completed frame continues into the completion path
    /// on this worker.
    pub(super) fn poll(self) {
        match self.header().state.transition_to_running() {
            TransitionToRunning::Success => {}
            TransitionToRunning::AlreadyComplete => {
                // A completed frame is never re-enqueued; reaching this means
                // a stale handle was popped. Drop it on the floor.
                debug_assert!(false, "popped a completed frame");
                return;
            }
        }

        let waker = waker_ref(self.header_ptr());
        let mut cx = Context::from_waker(&waker);

        match poll_future(self.core(), &mut cx) {
            Poll::Pending => match self.header().state.transition_to_idle() {
                TransitionToIdle::Ok => {}
                TransitionToIdle::Requeue => {
                    // A wake raced with the suspension; the frame already
                    // carries the QUEUED claim, we just publish it. Once
                    // pushed, another worker owns the frame — nothing here
                    // may touch it afterwards.
                    let scheduler = unsafe { Header::scheduler(self.header_ptr()) };
                    scheduler.requeue(unsafe { RawTask::from_raw(self.header_ptr()) });
                }
            },
            Poll::Ready(()) => self.complete(),
        }
    }

    /// Runs on the completing worker immediately after the final poll. Reads
    /// the continuation; a parent's join counter hitting zero re-enqueues the
    /// parent, a continuation-less (top-level) frame surfaces its error to
    /// the scheduler and is released here.
    fn complete(self) {
        let header_ptr = self.header_ptr();
        self.header().state.transition_to_complete();

        let scheduler = unsafe { Header::scheduler(header_ptr) };
        let continuation = unsafe { Header::continuation(header_ptr) };

        match continuation {
            Some(parent) => {
                // Ownership of this frame passes to the await primitive that
                // installed the continuation; it reads the result during the
                // parent's resumption and releases the frame. This worker
                // must not touch the frame after the decrement below.
                scheduler.release_task();

                let pending = unsafe { parent.as_ref() }
                    .pending_children
                    .fetch_sub(1, Ordering::AcqRel);
                debug_assert!(pending >= 1, "join counter underflow");

                if pending == 1 {
                    tracing::trace!(target: "weft::task", "last child done, waking parent");
                    scheduler.schedule_wake(unsafe { RawTask::from_raw(parent) });
                }
            }
            None => {
                // Top-level frame: surface the error (before the in-flight
                // decrement, so `run()` cannot return without observing it)
                // and release the frame.
                if let Err(e) = self.take_output() {
                    scheduler.record_task_error(e);
                }
                self.dealloc();
                scheduler.release_task();
            }
        }
    }

    /// Moves the output out of the result slot. Called exactly once, by the
    /// frame's sole owner, after completion.
    pub(super) fn take_output(&self) -> Result<T> {
        unsafe {
            self.core().with_stage(|stage| {
                match ptr::replace(stage, Stage::Consumed) {
                    Stage::Finished(output) => output,
                    _ => unreachable!("result slot read before completion"),
                }
            })
        }
    }

    /// Drops the stage contents and releases the frame memory through the
    /// allocator that produced it.
    pub(super) fn dealloc(self) {
        unsafe {
            let cell = self.cell.as_ptr();
            let alloc = ManuallyDrop::take(&mut (*cell).alloc);
            ptr::drop_in_place(&mut (*cell).header);
            ptr::drop_in_place(&mut (*cell).core);
            alloc.deallocate(cell.cast::<u8>(), Layout::new::<Cell<F, A>>());
        }
    }
}

/// Polls the future, writing the output (or the captured panic) into the
/// result slot on completion.
fn poll_future<T, F>(core: &Core<F>, cx: &mut Context<'_>) -> Poll<()>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let res = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        core.with_stage(|stage| {
            let future = match &mut *stage {
                Stage::Running(future) => future,
                _ => unreachable!("polled a frame without a live future"),
            };
            // The frame is heap-allocated and never moves.
            Pin::new_unchecked(future).poll(cx)
        })
    }));

    let output: Result<T, Error> = match res {
        Ok(Poll::Pending) => return Poll::Pending,
        Ok(Poll::Ready(output)) => output,
        Err(payload) => Err(Error::from_panic(payload)),
    };

    // Replacing the stage drops the future (it already ran to completion, or
    // unwound; either way its last suspension point is dead). A panicking
    // drop here would be a double-panic abort, which is acceptable for a
    // future that already tore its own state.
    unsafe {
        core.with_stage(|stage| ptr::replace(stage, Stage::Finished(output)));
    }

    Poll::Ready(())
}
