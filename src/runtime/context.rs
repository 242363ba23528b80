//! Per-worker context: which frame is currently being polled, and on which
//! scheduler.
//!
//! The await primitives run inside the parent's poll and need the parent's
//! frame to install continuations; the worker installs it here around every
//! resume. This is worker-thread-only state — wake paths never consult it,
//! they go through the scheduler back-pointer carried by each frame.

use crate::runtime::Shared;
use crate::task::Header;
use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::Arc;

pub(crate) struct Current {
    pub(crate) shared: Arc<Shared>,
    pub(crate) frame: NonNull<Header>,
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

pub(crate) struct ContextGuard {
    _priv: (),
}

/// Installs `frame` as the thread's current task for the duration of the
/// returned guard. Polls never nest, so entering twice is a runtime bug.
pub(crate) fn enter(shared: &Arc<Shared>, frame: NonNull<Header>) -> ContextGuard {
    CURRENT.with(|cell| {
        let prev = cell.borrow_mut().replace(Current {
            shared: shared.clone(),
            frame,
        });
        assert!(prev.is_none(), "worker polled a frame while another was current");
    });
    ContextGuard { _priv: () }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.borrow_mut().take());
    }
}

/// Runs `f` with the current task context. Panics when called from outside a
/// worker's poll — awaiting a task or an I/O operation only makes sense
/// inside a running task.
pub(crate) fn with_current<R>(f: impl FnOnce(&Current) -> R) -> R {
    CURRENT.with(|cell| {
        let borrow = cell.borrow();
        match borrow.as_ref() {
            Some(current) => f(current),
            None => panic!("await used outside of a running task"),
        }
    })
}
