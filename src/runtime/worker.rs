//! The resume loop every worker thread executes.

use crate::runtime::{context, Shared};
use crate::task::RawTask;
use crossbeam_utils::Backoff;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Which shutdown gate a thread observes.
///
/// The driver (the thread inside `Scheduler::run`) keeps going until nothing
/// is in flight. Spawned workers leave one task earlier: once a single task
/// remains, only the driver may finish it, which guarantees the final
/// completion is observed by the thread that owns `run()`'s return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Role {
    Driver,
    Worker,
}

impl Role {
    fn gate(self) -> usize {
        match self {
            Role::Driver => 0,
            Role::Worker => 1,
        }
    }
}

pub(super) fn run(shared: &Arc<Shared>, role: Role) {
    tracing::trace!(target: "weft::worker", ?role, "worker loop started");
    let backoff = Backoff::new();

    while shared.in_flight.load(Ordering::Acquire) > role.gate() {
        match shared.ready.try_pop() {
            Some(raw) => {
                backoff.reset();
                resume(shared, raw);
            }
            None => {
                // Nothing observable: spin briefly, then fall back to
                // yielding so suspended-on-I/O phases don't burn the core.
                if backoff.is_completed() {
                    thread::yield_now();
                } else {
                    backoff.snooze();
                }
            }
        }
    }

    tracing::trace!(target: "weft::worker", ?role, "worker loop finished");
}

fn resume(shared: &Arc<Shared>, raw: RawTask) {
    let _guard = context::enter(shared, raw.header_ptr());
    // State transitions, panic capture, and the completion path all live in
    // the frame's harness behind this vtable call.
    raw.poll();
}
