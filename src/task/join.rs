//! The await primitives: suspend a running task on one child or on a batch.
//!
//! Awaiting consumes the `Task` handle, so installing a second continuation
//! on the same frame is unrepresentable. Both primitives follow the same
//! protocol: install the parent link on every child, store the child count
//! into the parent's join counter with release semantics, schedule the
//! children, and return `Pending`. The decrement that takes the counter to
//! zero re-enqueues the parent; on resumption the results are moved out in
//! input order and the child frames are released.

use crate::error::{fatal, Result};
use crate::runtime::{context, Shared};
use crate::task::raw::RawTask;
use crate::task::Task;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};

/// Future returned by awaiting a [`Task`]. Created through `IntoFuture`;
/// yields the child's result or re-raises its error.
pub struct JoinOne<T> {
    state: JoinOneState,
    _p: PhantomData<fn() -> T>,
}

enum JoinOneState {
    /// Child not yet scheduled; its frame is still owned by this future.
    Install(RawTask),
    /// Child scheduled, parent suspended on it.
    Waiting(RawTask),
    Done,
}

/// Future returned by [`join_all`]. Yields the children's results in input
/// order, or the error of the lowest-indexed failed child.
pub struct JoinAll<T> {
    state: JoinAllState,
    children: Vec<RawTask>,
    _p: PhantomData<fn() -> T>,
}

#[derive(PartialEq, Eq)]
enum JoinAllState {
    Install,
    Waiting,
    Done,
}

/// Suspends the calling task until every task in `tasks` has completed.
///
/// Results come back in the order the tasks were supplied, independent of
/// completion order. If one or more children fail, the error of the first
/// failing child (by input index) is returned and the remaining outcomes are
/// discarded; all child frames are released either way. An empty batch
/// completes immediately without suspending.
pub fn join_all<T>(tasks: impl IntoIterator<Item = Task<T>>) -> JoinAll<T>
where
    T: Send + 'static,
{
    JoinAll {
        state: JoinAllState::Install,
        children: tasks.into_iter().map(Task::into_raw).collect(),
        _p: PhantomData,
    }
}

impl<T: Send + 'static> JoinOne<T> {
    pub(super) fn new(child: RawTask) -> JoinOne<T> {
        JoinOne {
            state: JoinOneState::Install(child),
            _p: PhantomData,
        }
    }
}

impl<T: Send + 'static> Future for JoinOne<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.state {
            JoinOneState::Install(child) => {
                context::with_current(|ctx| {
                    let parent = ctx.frame;
                    unsafe { child.set_continuation(parent) };
                    unsafe { parent.as_ref() }
                        .pending_children
                        .store(1, Ordering::Release);
                    Shared::schedule_frame(&ctx.shared, child);
                });

                this.state = JoinOneState::Waiting(child);
                Poll::Pending
            }
            JoinOneState::Waiting(child) => {
                // Woken only by the child's own 1 -> 0 decrement.
                debug_assert!(child.is_complete(), "parent resumed before child completed");

                this.state = JoinOneState::Done;
                Poll::Ready(consume(child))
            }
            JoinOneState::Done => panic!("awaited task polled after completion"),
        }
    }
}

impl<T: Send + 'static> Future for JoinAll<T> {
    type Output = Result<Vec<T>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.state {
            JoinAllState::Install => {
                if this.children.is_empty() {
                    this.state = JoinAllState::Done;
                    return Poll::Ready(Ok(Vec::new()));
                }

                context::with_current(|ctx| {
                    let parent = ctx.frame;

                    // The counter must cover the whole batch before any child
                    // can start decrementing it.
                    unsafe { parent.as_ref() }
                        .pending_children
                        .store(this.children.len(), Ordering::Release);

                    for child in &this.children {
                        unsafe { child.set_continuation(parent) };
                    }
                    for child in &this.children {
                        Shared::schedule_frame(&ctx.shared, *child);
                    }
                });

                this.state = JoinAllState::Waiting;
                Poll::Pending
            }
            JoinAllState::Waiting => {
                this.state = JoinAllState::Done;

                let mut results = Vec::with_capacity(this.children.len());
                let mut first_error = None;

                for child in this.children.drain(..) {
                    debug_assert!(child.is_complete(), "parent resumed before batch completed");
                    match consume(child) {
                        Ok(value) => results.push(value),
                        Err(e) => {
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                }

                Poll::Ready(match first_error {
                    Some(e) => Err(e),
                    None => Ok(results),
                })
            }
            JoinAllState::Done => panic!("awaited batch polled after completion"),
        }
    }
}

/// Moves the result out of a completed child and releases its frame.
fn consume<T: Send + 'static>(child: RawTask) -> Result<T> {
    let mut output: Option<Result<T>> = None;
    unsafe { child.read_output(&mut output as *mut Option<Result<T>> as *mut ()) };
    child.dealloc();
    output.expect("completed frame must hold a result")
}

impl<T> Drop for JoinOne<T> {
    fn drop(&mut self) {
        match self.state {
            // Never scheduled: this future still owns the child's frame.
            JoinOneState::Install(child) => child.dealloc(),
            JoinOneState::Done => {}
            JoinOneState::Waiting(_) => {
                // The child holds a continuation pointer into a frame that is
                // about to resume without it. There is no safe unwinding.
                fatal("await abandoned while its child was in flight");
            }
        }
    }
}

impl<T> Drop for JoinAll<T> {
    fn drop(&mut self) {
        match self.state {
            // Children here were never scheduled (Install, or the scheduling
            // step never ran); their frames are still ours.
            JoinAllState::Install | JoinAllState::Done => {
                for child in self.children.drain(..) {
                    child.dealloc();
                }
            }
            JoinAllState::Waiting => {
                fatal("await abandoned while its children were in flight");
            }
        }
    }
}
