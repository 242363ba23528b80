//! The I/O reactor: one dedicated thread per scheduler owning an `io_uring`
//! instance.
//!
//! Workers never touch the ring. They hand an [`Op`] to the reactor over a
//! channel and nudge it through an eventfd whose read is kept armed in the
//! ring — so the nudge is just another completion, and the reactor can block
//! in `submit_and_wait` with no timeout. When an operation's final CQE
//! arrives the reactor closes the file, stores the outcome, and wakes the
//! suspended frame; the waker routes through the frame's scheduler
//! back-pointer, which is exactly what makes this thread (not a worker) able
//! to re-enqueue it.

use crate::error::fatal;
use io_uring::{opcode, squeue, types, IoUring};
use parking_lot::Mutex;
use slab::Slab;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::task::Waker;
use std::thread::{self, JoinHandle};

const RING_ENTRIES: u32 = 256;

/// `user_data` reserved for the eventfd read; slab keys stay well below it.
const WAKE_TOKEN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Read,
    Write,
}

/// A whole-file transfer handed to the reactor. For reads `buf` is a zeroed
/// buffer sized to the file; for writes it is the data.
pub(crate) struct Op {
    pub(crate) file: File,
    pub(crate) buf: Vec<u8>,
    pub(crate) kind: OpKind,
    pub(crate) state: Arc<OpState>,
}

/// Shared between the awaiting future and the reactor.
pub(crate) struct OpState {
    pub(crate) lifecycle: Mutex<OpLifecycle>,
}

pub(crate) struct OpLifecycle {
    /// Wakes the suspended frame; registered before submission, so the
    /// reactor always finds it.
    pub(crate) waker: Option<Waker>,
    /// The transferred bytes (reads) or the empty remainder (writes).
    pub(crate) result: Option<io::Result<Vec<u8>>>,
}

pub(crate) struct ReactorHandle {
    /// `None` once shut down; dropping the sender is what lets the reactor
    /// thread drain out.
    ops: Mutex<Option<Sender<Op>>>,
    wake_fd: OwnedFd,
    thread: Option<JoinHandle<()>>,
}

impl ReactorHandle {
    pub(crate) fn start() -> io::Result<ReactorHandle> {
        let wake_fd = create_eventfd()?;
        let ring = IoUring::new(RING_ENTRIES)?;
        let (tx, rx) = mpsc::channel();

        let wake_raw = wake_fd.as_raw_fd();
        let thread = thread::Builder::new()
            .name("weft-reactor".into())
            .spawn(move || {
                Reactor {
                    ring,
                    incoming: rx,
                    wake_fd: wake_raw,
                    wake_buf: Box::new([0u8; 8]),
                    in_flight: Slab::new(),
                }
                .run()
            })?;

        tracing::debug!(target: "weft::io", "reactor started");

        Ok(ReactorHandle {
            ops: Mutex::new(Some(tx)),
            wake_fd,
            thread: Some(thread),
        })
    }

    /// Queues an operation and nudges the reactor. Fails only if the reactor
    /// is gone, which the awaiter surfaces as an outright rejection.
    pub(crate) fn submit(&self, op: Op) -> io::Result<()> {
        {
            let guard = self.ops.lock();
            let tx = guard
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "reactor shut down"))?;
            tx.send(op).map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "reactor thread terminated")
            })?;
        }
        write_eventfd(self.wake_fd.as_raw_fd());
        Ok(())
    }

    /// Closes the channel, nudges the reactor awake, and joins it. Any
    /// still-outstanding operations finish first.
    pub(crate) fn shutdown(mut self) {
        self.ops.lock().take();
        write_eventfd(self.wake_fd.as_raw_fd());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!(target: "weft::io", "reactor stopped");
    }
}

struct InFlight {
    file: File,
    buf: Vec<u8>,
    kind: OpKind,
    /// Bytes already transferred; doubles as the resubmission offset.
    transferred: usize,
    state: Arc<OpState>,
}

struct Reactor {
    ring: IoUring,
    incoming: Receiver<Op>,
    wake_fd: RawFd,
    /// Target of the armed eventfd read. Boxed: the kernel holds its address
    /// across loop iterations.
    wake_buf: Box<[u8; 8]>,
    in_flight: Slab<InFlight>,
}

impl Reactor {
    fn run(mut self) {
        self.arm_wake();
        let mut closed = false;

        loop {
            loop {
                match self.incoming.try_recv() {
                    Ok(op) => self.begin(op),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }

            if closed && self.in_flight.is_empty() {
                return;
            }

            if let Err(e) = self.submit_and_wait() {
                if e.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                fatal(&format!("io_uring submit_and_wait failed: {e}"));
            }

            let mut completions = Vec::new();
            {
                let mut completion_queue = self.ring.completion();
                while let Some(cqe) = completion_queue.next() {
                    completions.push((cqe.user_data(), cqe.result()));
                }
            }
            for (user_data, result) in completions {
                if user_data == WAKE_TOKEN {
                    self.arm_wake();
                } else {
                    self.advance(user_data as usize, result);
                }
            }
        }
    }

    /// Keeps one read on the eventfd outstanding so channel senders can
    /// interrupt `submit_and_wait` from any thread.
    fn arm_wake(&mut self) {
        let sqe = opcode::Read::new(types::Fd(self.wake_fd), self.wake_buf.as_mut_ptr(), 8)
            .build()
            .user_data(WAKE_TOKEN);
        self.push(sqe);
    }

    fn begin(&mut self, op: Op) {
        let Op {
            file,
            buf,
            kind,
            state,
        } = op;
        let key = self.in_flight.insert(InFlight {
            file,
            buf,
            kind,
            transferred: 0,
            state,
        });
        self.submit_entry(key);
    }

    fn submit_entry(&mut self, key: usize) {
        let sqe = {
            let entry = &mut self.in_flight[key];
            let remaining = (entry.buf.len() - entry.transferred) as u32;
            let offset = entry.transferred as u64;
            let fd = types::Fd(entry.file.as_raw_fd());

            match entry.kind {
                OpKind::Read => {
                    let ptr = unsafe { entry.buf.as_mut_ptr().add(entry.transferred) };
                    opcode::Read::new(fd, ptr, remaining)
                        .offset(offset)
                        .build()
                        .user_data(key as u64)
                }
                OpKind::Write => {
                    let ptr = unsafe { entry.buf.as_ptr().add(entry.transferred) };
                    opcode::Write::new(fd, ptr, remaining)
                        .offset(offset)
                        .build()
                        .user_data(key as u64)
                }
            }
        };
        self.push(sqe);
    }

    /// Publishes queued SQEs to the kernel and blocks for at least one
    /// completion.
    fn submit_and_wait(&mut self) -> std::io::Result<usize> {
        self.ring.submission().sync();
        self.ring.submitter().submit_and_wait(1)
    }

    fn push(&mut self, sqe: squeue::Entry) {
        loop {
            // Safety: the buffer the entry points into lives in `in_flight`
            // (or `wake_buf`) until the matching CQE is reaped, and `Vec`
            // storage does not move when the slab reallocates.
            let res = {
                let mut sq = self.ring.submission();
                let res = unsafe { sq.push(&sqe) };
                sq.sync();
                res
            };

            match res {
                Ok(()) => return,
                Err(_) => {
                    // SQ full; flush what is queued and retry.
                    if let Err(e) = self.ring.submit() {
                        if e.raw_os_error() == Some(libc::EINTR) {
                            continue;
                        }
                        fatal(&format!("io_uring submit failed: {e}"));
                    }
                }
            }
        }
    }

    fn advance(&mut self, key: usize, result: i32) {
        if result < 0 {
            self.finish(key, Err(io::Error::from_raw_os_error(-result)));
            return;
        }

        let n = result as usize;
        let (done, write_zero) = {
            let entry = &mut self.in_flight[key];
            entry.transferred += n;
            let remaining = entry.buf.len() - entry.transferred;
            (
                remaining == 0 || n == 0,
                n == 0 && remaining > 0 && entry.kind == OpKind::Write,
            )
        };

        if write_zero {
            self.finish(
                key,
                Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero before completing",
                )),
            );
        } else if done {
            self.finish_ok(key);
        } else {
            // Short transfer; resume at the advanced offset.
            self.submit_entry(key);
        }
    }

    fn finish_ok(&mut self, key: usize) {
        let InFlight {
            file,
            mut buf,
            transferred,
            state,
            ..
        } = self.in_flight.remove(key);

        // Close before waking, so the awaiter observes a settled file.
        drop(file);
        // A read hitting EOF early (file shrank mid-flight) yields what was
        // actually transferred.
        buf.truncate(transferred);
        complete(state, Ok(buf));
    }

    fn finish(&mut self, key: usize, err: io::Result<Vec<u8>>) {
        let entry = self.in_flight.remove(key);
        drop(entry.file);
        complete(entry.state, err);
    }
}

fn complete(state: Arc<OpState>, result: io::Result<Vec<u8>>) {
    let waker = {
        let mut lifecycle = state.lifecycle.lock();
        lifecycle.result = Some(result);
        lifecycle.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
}

fn create_eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn write_eventfd(fd: RawFd) {
    let val: u64 = 1;
    let ret = unsafe { libc::write(fd, &val as *const u64 as *const libc::c_void, 8) };
    debug_assert_eq!(ret, 8);
}
