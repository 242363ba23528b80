//! Atomic lifecycle word for a task frame.
//!
//! The word resolves the race between a worker suspending a frame and a wake
//! arriving for it from another thread (a completing child or the I/O
//! reactor). Wakes that land while the frame is mid-poll set `NOTIFIED`; the
//! polling worker observes the bit when it transitions to idle and re-enqueues
//! the frame itself. Together with `QUEUED` this keeps a frame in the ready
//! queue at most once at any instant.

use std::sync::atomic::{AtomicUsize, Ordering};

/// The frame is in the ready queue.
const QUEUED: usize = 0b0001;

/// A worker is currently polling the frame.
const RUNNING: usize = 0b0010;

/// The result slot has been written; the frame will never run again.
const COMPLETE: usize = 0b0100;

/// A wake arrived while `RUNNING`; the polling worker must re-enqueue.
const NOTIFIED: usize = 0b1000;

/// An idle, never-scheduled frame.
const INITIAL: usize = 0;

pub(crate) struct State {
    val: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Snapshot(usize);

impl Snapshot {
    pub(crate) fn is_queued(self) -> bool {
        self.0 & QUEUED != 0
    }

    pub(crate) fn is_running(self) -> bool {
        self.0 & RUNNING != 0
    }

    pub(crate) fn is_complete(self) -> bool {
        self.0 & COMPLETE != 0
    }

    pub(crate) fn is_notified(self) -> bool {
        self.0 & NOTIFIED != 0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToRunning {
    Success,
    /// Defensive: the handle was popped for a frame that already completed.
    AlreadyComplete,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToIdle {
    Ok,
    /// A wake landed during the poll; the caller owns the re-enqueue.
    Requeue,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToNotified {
    /// The caller must push the frame onto the ready queue.
    Submit,
    /// Already queued, running (the poller will re-enqueue), or complete.
    DoNothing,
}

impl State {
    pub(crate) fn new() -> State {
        State {
            val: AtomicUsize::new(INITIAL),
        }
    }

    pub(crate) fn load(&self) -> Snapshot {
        Snapshot(self.val.load(Ordering::Acquire))
    }

    /// First schedule of a fresh frame. Anything but the initial state means
    /// the same handle was scheduled twice.
    pub(crate) fn transition_to_queued(&self) -> Result<(), Snapshot> {
        self.val
            .compare_exchange(INITIAL, QUEUED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Snapshot)
    }

    /// A worker claims a popped frame for polling.
    pub(crate) fn transition_to_running(&self) -> TransitionToRunning {
        let mut cur = self.val.load(Ordering::Acquire);
        loop {
            if cur & COMPLETE != 0 {
                return TransitionToRunning::AlreadyComplete;
            }

            debug_assert!(cur & QUEUED != 0, "popped frame was not queued");
            debug_assert!(cur & RUNNING == 0, "popped frame is already being polled");

            let next = (cur & !QUEUED) | RUNNING;
            match self
                .val
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return TransitionToRunning::Success,
                Err(actual) => cur = actual,
            }
        }
    }

    /// The poll returned `Pending`. Clears `RUNNING`; if a wake arrived in
    /// the meantime, atomically converts it into `QUEUED` and tells the
    /// caller to push.
    pub(crate) fn transition_to_idle(&self) -> TransitionToIdle {
        let mut cur = self.val.load(Ordering::Acquire);
        loop {
            debug_assert!(cur & RUNNING != 0);

            let (next, res) = if cur & NOTIFIED != 0 {
                (
                    (cur & !(RUNNING | NOTIFIED)) | QUEUED,
                    TransitionToIdle::Requeue,
                )
            } else {
                (cur & !RUNNING, TransitionToIdle::Ok)
            };

            match self
                .val
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return res,
                Err(actual) => cur = actual,
            }
        }
    }

    /// The poll finished and the result slot is written. A concurrent
    /// `NOTIFIED` is discarded: wakes aimed at a completed frame are no-ops.
    pub(crate) fn transition_to_complete(&self) -> Snapshot {
        let mut cur = self.val.load(Ordering::Acquire);
        loop {
            debug_assert!(cur & RUNNING != 0);
            debug_assert!(cur & COMPLETE == 0);

            let next = (cur & !(RUNNING | NOTIFIED)) | COMPLETE;
            match self
                .val
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(prev) => return Snapshot(prev),
                Err(actual) => cur = actual,
            }
        }
    }

    /// A wake for a suspended frame, from any thread. The CAS guarantees that
    /// exactly one of the racing parties (waker vs. suspending poller) owns
    /// the eventual re-enqueue.
    pub(crate) fn transition_to_notified(&self) -> TransitionToNotified {
        let mut cur = self.val.load(Ordering::Acquire);
        loop {
            if cur & (COMPLETE | QUEUED) != 0 {
                return TransitionToNotified::DoNothing;
            }

            let (next, res) = if cur & RUNNING != 0 {
                (cur | NOTIFIED, TransitionToNotified::DoNothing)
            } else {
                (cur | QUEUED, TransitionToNotified::Submit)
            };

            match self
                .val
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return res,
                Err(actual) => cur = actual,
            }
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.load();
        f.debug_struct("State")
            .field("queued", &s.is_queued())
            .field("running", &s.is_running())
            .field("complete", &s.is_complete())
            .field("notified", &s.is_notified())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_run_complete() {
        let s = State::new();
        s.transition_to_queued().unwrap();
        assert!(s.load().is_queued());

        assert_eq!(s.transition_to_running(), TransitionToRunning::Success);
        assert!(s.load().is_running());
        assert!(!s.load().is_queued());

        let prev = s.transition_to_complete();
        assert!(prev.is_running());
        assert!(s.load().is_complete());
    }

    #[test]
    fn double_schedule_is_detected() {
        let s = State::new();
        s.transition_to_queued().unwrap();
        assert!(s.transition_to_queued().is_err());
    }

    #[test]
    fn wake_while_running_defers_to_poller() {
        let s = State::new();
        s.transition_to_queued().unwrap();
        s.transition_to_running();

        // Wake lands mid-poll: no push from the waker.
        assert_eq!(s.transition_to_notified(), TransitionToNotified::DoNothing);
        assert!(s.load().is_notified());

        // The poller converts the notification into a re-enqueue.
        assert_eq!(s.transition_to_idle(), TransitionToIdle::Requeue);
        assert!(s.load().is_queued());
        assert!(!s.load().is_notified());
    }

    #[test]
    fn wake_while_idle_submits_once() {
        let s = State::new();
        s.transition_to_queued().unwrap();
        s.transition_to_running();
        assert_eq!(s.transition_to_idle(), TransitionToIdle::Ok);

        assert_eq!(s.transition_to_notified(), TransitionToNotified::Submit);
        // Second wake while queued is absorbed.
        assert_eq!(s.transition_to_notified(), TransitionToNotified::DoNothing);
    }

    #[test]
    fn wake_after_complete_is_a_noop() {
        let s = State::new();
        s.transition_to_queued().unwrap();
        s.transition_to_running();
        s.transition_to_complete();
        assert_eq!(s.transition_to_notified(), TransitionToNotified::DoNothing);
    }

    #[test]
    fn notified_is_discarded_on_completion() {
        let s = State::new();
        s.transition_to_queued().unwrap();
        s.transition_to_running();
        s.transition_to_notified();
        let prev = s.transition_to_complete();
        assert!(prev.is_notified());
        assert!(!s.load().is_notified());
        assert!(s.load().is_complete());
    }
}
