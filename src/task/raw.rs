use crate::error::Result;
use crate::runtime::Shared;
use crate::task::alloc::FrameAllocator;
use crate::task::layout::Cell;
use crate::task::state::State;
use crate::task::Header;
use std::future::Future;
use std::ptr::NonNull;
use std::sync::Weak;

/// Thin, relocatable handle to a task frame: the "resumable" a worker uses to
/// continue execution at the frame's last suspension point. Copies of this
/// handle do not confer ownership; the lifecycle word and the await protocol
/// decide who may touch the frame.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawTask {
    ptr: NonNull<Header>,
}

// Safety: frames only hold `Send` futures (enforced at construction), and
// every access is mediated by the state protocol.
unsafe impl Send for RawTask {}
unsafe impl Sync for RawTask {}

impl RawTask {
    pub(crate) fn new<T, F, A>(future: F, alloc: A) -> RawTask
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
        A: FrameAllocator,
    {
        RawTask {
            ptr: Cell::<F, A>::allocate(future, alloc),
        }
    }

    pub(crate) unsafe fn from_raw(ptr: NonNull<Header>) -> RawTask {
        RawTask { ptr }
    }

    pub(crate) fn header_ptr(&self) -> NonNull<Header> {
        self.ptr
    }

    pub(crate) fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn state(&self) -> &State {
        &self.header().state
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state().load().is_complete()
    }

    /// Resumes the frame. The caller must hold the `RUNNING` claim obtained
    /// from `transition_to_running` (the harness performs it).
    pub(crate) fn poll(self) {
        let vtable = self.header().vtable;
        unsafe { (vtable.poll)(self.ptr) }
    }

    /// Moves the finished output into `dst`.
    ///
    /// # Safety
    ///
    /// The frame is complete, the caller is its sole owner, and `dst` is a
    /// valid `*mut Option<Result<T>>` for the `T` this frame was built with.
    pub(crate) unsafe fn read_output(self, dst: *mut ()) {
        let vtable = self.header().vtable;
        (vtable.read_output)(self.ptr, dst)
    }

    /// Releases the frame's storage.
    ///
    /// # Safety is by protocol: the caller is the party the ownership
    /// handoff designates (awaiting parent, completing worker, or the
    /// never-scheduled handle's drop).
    pub(crate) fn dealloc(self) {
        let vtable = self.header().vtable;
        unsafe { (vtable.dealloc)(self.ptr) }
    }

    pub(crate) unsafe fn bind_scheduler(&self, scheduler: Weak<Shared>) {
        Header::bind_scheduler(self.ptr, scheduler);
    }

    pub(crate) unsafe fn set_continuation(&self, parent: NonNull<Header>) {
        Header::set_continuation(self.ptr, parent);
    }
}
