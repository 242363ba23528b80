use crate::task::raw::RawTask;
use crate::task::Header;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops;
use std::ptr::NonNull;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Borrowed waker handed to a frame's poll. The data pointer is the frame's
/// header; waking re-enqueues the frame through its scheduler back-pointer,
/// which is what makes the wake path callable from threads that are not
/// workers (the I/O reactor in particular).
///
/// There is no reference counting: a frame cannot complete, let alone be
/// released, while an operation holding a clone of its waker is outstanding,
/// because the frame is suspended on exactly that operation. Every clone is
/// therefore structurally outlived by its frame.
pub(super) struct WakerRef<'a> {
    waker: ManuallyDrop<Waker>,
    _p: PhantomData<&'a Header>,
}

pub(super) fn waker_ref(header: NonNull<Header>) -> WakerRef<'static> {
    WakerRef {
        waker: unsafe { ManuallyDrop::new(Waker::from_raw(raw_waker(header))) },
        _p: PhantomData,
    }
}

impl ops::Deref for WakerRef<'_> {
    type Target = Waker;

    fn deref(&self) -> &Waker {
        &self.waker
    }
}

unsafe fn clone_waker(ptr: *const ()) -> RawWaker {
    RawWaker::new(ptr, &WAKER_VTABLE)
}

unsafe fn drop_waker(_ptr: *const ()) {}

unsafe fn wake_by_val(ptr: *const ()) {
    wake_by_ref(ptr);
}

unsafe fn wake_by_ref(ptr: *const ()) {
    let header = NonNull::new_unchecked(ptr as *mut Header);
    let scheduler = Header::scheduler(header);
    scheduler.schedule_wake(RawTask::from_raw(header));
}

static WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_by_val, wake_by_ref, drop_waker);

fn raw_waker(header: NonNull<Header>) -> RawWaker {
    RawWaker::new(header.as_ptr() as *const (), &WAKER_VTABLE)
}
