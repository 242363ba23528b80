use crate::error::fatal;
use crate::runtime::Shared;
use crate::task::layout::Vtable;
use crate::task::state::State;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

/// Hot head of every task frame. The frame is referenced by thin
/// `NonNull<Header>` pointers; `Header` must stay the first field of the cell
/// so the casts in `raw.rs` are valid.
#[repr(C)]
pub(crate) struct Header {
    /// Lifecycle word; owns the queued/running/complete protocol.
    pub(super) state: State,

    /// Per-(future, allocator) entry points for this frame.
    pub(super) vtable: &'static Vtable,

    /// Parent frame awaiting this one. Written at most once, by an await
    /// primitive, strictly before this frame is published to the ready
    /// queue; read only by the worker that observes the completion
    /// transition. The queue's release/acquire pair orders the two.
    continuation: UnsafeCell<Option<NonNull<Header>>>,

    /// Number of children this frame still waits on. An await primitive
    /// stores the child count with release semantics before enqueuing any
    /// child; each completing child decrements it, and the decrement that
    /// observes 1 re-enqueues this frame.
    pub(crate) pending_children: AtomicUsize,

    /// Back-pointer to the scheduler that owns this frame. Assigned on first
    /// schedule, immutable afterwards, published by the same queue handoff as
    /// `continuation`. Wake paths on arbitrary threads (the I/O reactor
    /// included) go through it rather than any thread-local state. Weak, so
    /// queued frames never keep their scheduler alive (the C++-style
    /// non-owning back-pointer, minus the cycle).
    scheduler: UnsafeCell<Option<Weak<Shared>>>,
}

// Safety: the UnsafeCell fields follow a write-once-then-publish protocol
// (documented on each field); everything else is atomics and immutables.
unsafe impl Send for Header {}
unsafe impl Sync for Header {}

impl Header {
    pub(super) fn new(vtable: &'static Vtable) -> Header {
        Header {
            state: State::new(),
            vtable,
            continuation: UnsafeCell::new(None),
            pending_children: AtomicUsize::new(0),
            scheduler: UnsafeCell::new(None),
        }
    }

    /// Installs the parent link.
    ///
    /// # Safety
    ///
    /// The frame is not yet reachable by any other thread (not scheduled),
    /// and no continuation was installed before.
    pub(crate) unsafe fn set_continuation(me: NonNull<Header>, parent: NonNull<Header>) {
        let slot = me.as_ref().continuation.get();
        debug_assert!((*slot).is_none(), "continuation installed twice");
        *slot = Some(parent);
    }

    /// Reads the parent link.
    ///
    /// # Safety
    ///
    /// Caller is the worker that observed this frame's completion transition;
    /// nobody writes the field after publication.
    pub(crate) unsafe fn continuation(me: NonNull<Header>) -> Option<NonNull<Header>> {
        *me.as_ref().continuation.get()
    }

    /// Assigns the scheduler back-pointer.
    ///
    /// # Safety
    ///
    /// Called on the scheduling path, before the frame is pushed; the frame
    /// is not reachable by other threads yet.
    pub(crate) unsafe fn bind_scheduler(me: NonNull<Header>, scheduler: Weak<Shared>) {
        let slot = me.as_ref().scheduler.get();
        debug_assert!((*slot).is_none(), "frame bound to a scheduler twice");
        *slot = Some(scheduler);
    }

    /// Reads the scheduler back-pointer, returning a strong handle so the
    /// caller never outlives it.
    ///
    /// # Safety
    ///
    /// The frame has been scheduled (the pointer is set before publication)
    /// and is still alive. A live frame implies a live scheduler: completions
    /// run inside `run()`, and the reactor is joined before the scheduler's
    /// shared state drops.
    pub(crate) unsafe fn scheduler(me: NonNull<Header>) -> Arc<Shared> {
        match &*me.as_ref().scheduler.get() {
            Some(weak) => weak
                .upgrade()
                .unwrap_or_else(|| fatal("scheduler dropped while its frames were alive")),
            None => fatal("frame resumed before it was ever scheduled"),
        }
    }
}
