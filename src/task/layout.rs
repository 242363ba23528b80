//! The task cell: in-memory layout of a frame and the vtable erasing its
//! generics.

use crate::error::{Error, Result};
use crate::task::alloc::FrameAllocator;
use crate::task::harness::Harness;
use crate::task::Header;
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// The components of a task frame.
///
/// `Header` must be the first field: the frame is referenced both as
/// `*mut Cell<F, A>` and as `*mut Header`.
#[repr(C)]
pub(super) struct Cell<F: Future, A: FrameAllocator> {
    /// Hot frame state, shared with wake paths.
    pub(super) header: Header,

    /// Either the future or its output, depending on the execution stage.
    pub(super) core: Core<F>,

    /// The allocator that produced this cell; taken out right before the
    /// memory is released. `ManuallyDrop` so `drop_in_place` on the cell
    /// leaves it alive for the final `deallocate` call.
    pub(super) alloc: ManuallyDrop<A>,
}

#[repr(C)]
pub(super) struct Core<F: Future> {
    stage: UnsafeCell<Stage<F>>,
}

/// Result-slot state machine. Transitions are monotonic:
/// `Running → Finished → Consumed`, each edge taken exactly once.
pub(super) enum Stage<F: Future> {
    Running(F),
    Finished(F::Output),
    Consumed,
}

impl<F: Future> Core<F> {
    /// # Safety
    ///
    /// Mutual exclusion on the stage field. The lifecycle word provides it:
    /// only the worker holding the `RUNNING` transition (or the sole owner of
    /// a completed frame) touches the stage.
    pub(super) unsafe fn with_stage<R>(&self, f: impl FnOnce(*mut Stage<F>) -> R) -> R {
        f(self.stage.get())
    }
}

impl<T, F, A> Cell<F, A>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    A: FrameAllocator,
{
    /// Allocates and initialises a frame through `alloc`, returning the thin
    /// header pointer. Execution is deferred: nothing runs until the frame is
    /// scheduled and polled.
    pub(super) fn allocate(future: F, alloc: A) -> NonNull<Header> {
        let layout = Layout::new::<Cell<F, A>>();

        unsafe {
            let ptr = alloc.allocate(layout) as *mut Cell<F, A>;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }

            ptr.write(Cell {
                header: Header::new(vtable::<T, F, A>()),
                core: Core {
                    stage: UnsafeCell::new(Stage::Running(future)),
                },
                alloc: ManuallyDrop::new(alloc),
            });

            NonNull::new_unchecked(ptr.cast::<Header>())
        }
    }
}

pub(crate) struct Vtable {
    /// Resumes the frame at its last suspension point and runs the
    /// completion path if it finishes.
    pub(super) poll: unsafe fn(NonNull<Header>),

    /// Moves the finished output into `dst`, a `*mut Option<Result<T>>`.
    pub(super) read_output: unsafe fn(NonNull<Header>, *mut ()),

    /// Drops whatever the stage holds and releases the frame's memory.
    pub(super) dealloc: unsafe fn(NonNull<Header>),
}

/// The vtable for the requested generics. The expression is promotable, so
/// each instantiation is a single static.
fn vtable<T, F, A>() -> &'static Vtable
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    A: FrameAllocator,
{
    &Vtable {
        poll: poll::<T, F, A>,
        read_output: read_output::<T, F, A>,
        dealloc: dealloc::<T, F, A>,
    }
}

unsafe fn poll<T, F, A>(ptr: NonNull<Header>)
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    A: FrameAllocator,
{
    Harness::<T, F, A>::from_raw(ptr).poll();
}

unsafe fn read_output<T, F, A>(ptr: NonNull<Header>, dst: *mut ())
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    A: FrameAllocator,
{
    let dst = &mut *(dst as *mut Option<Result<T, Error>>);
    *dst = Some(Harness::<T, F, A>::from_raw(ptr).take_output());
}

unsafe fn dealloc<T, F, A>(ptr: NonNull<Header>)
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    A: FrameAllocator,
{
    Harness::<T, F, A>::from_raw(ptr).dealloc();
}
