//! Suspendable whole-file operations.

use crate::error::{fatal, Result};
use crate::io::reactor::{Op, OpKind, OpLifecycle, OpState};
use crate::runtime::context;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::mem;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Reads the entire contents of `path`.
///
/// The open and the size probe happen on the calling worker; if either is
/// rejected the task fails immediately without suspending. Once the transfer
/// is in flight the task suspends and its worker moves on. Must be awaited
/// from inside a running task.
pub async fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let file = OpenOptions::new().read(true).open(path.as_ref())?;
    let len = file.metadata()?.len() as usize;
    let bytes = FileOp::new(file, vec![0u8; len], OpKind::Read).await?;
    Ok(bytes)
}

/// Writes `data` as the entire contents of `path`, creating or truncating
/// it. Same suspension contract as [`read_file`].
pub async fn write_file(path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path.as_ref())?;
    FileOp::new(file, data.into(), OpKind::Write).await?;
    Ok(())
}

struct FileOp {
    state: FileOpState,
}

enum FileOpState {
    /// Not yet handed to the reactor.
    Submit {
        file: File,
        buf: Vec<u8>,
        kind: OpKind,
    },
    /// In flight; the reactor owns the file and buffer.
    Waiting(Arc<OpState>),
    Done,
}

impl FileOp {
    fn new(file: File, buf: Vec<u8>, kind: OpKind) -> FileOp {
        FileOp {
            state: FileOpState::Submit { file, buf, kind },
        }
    }
}

impl Future for FileOp {
    type Output = io::Result<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match mem::replace(&mut this.state, FileOpState::Done) {
            FileOpState::Submit { file, buf, kind } => {
                // Register the waker before submission, so the completion
                // always finds one no matter how quickly it lands.
                let op_state = Arc::new(OpState {
                    lifecycle: Mutex::new(OpLifecycle {
                        waker: Some(cx.waker().clone()),
                        result: None,
                    }),
                });

                let op = Op {
                    file,
                    buf,
                    kind,
                    state: op_state.clone(),
                };

                match context::with_current(|ctx| ctx.shared.submit_io(op)) {
                    Ok(()) => {
                        this.state = FileOpState::Waiting(op_state);
                        Poll::Pending
                    }
                    // Rejected outright: fail without suspending.
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
            FileOpState::Waiting(op_state) => {
                let mut lifecycle = op_state.lifecycle.lock();
                match lifecycle.result.take() {
                    Some(result) => {
                        drop(lifecycle);
                        Poll::Ready(result)
                    }
                    None => {
                        lifecycle.waker = Some(cx.waker().clone());
                        drop(lifecycle);
                        this.state = FileOpState::Waiting(op_state);
                        Poll::Pending
                    }
                }
            }
            FileOpState::Done => panic!("file operation polled after completion"),
        }
    }
}

impl Drop for FileOp {
    fn drop(&mut self) {
        if let FileOpState::Waiting(op_state) = &self.state {
            // The reactor will complete into this state and wake a frame
            // that has moved on; there is no safe way to untangle that.
            if op_state.lifecycle.lock().result.is_none() {
                fatal("file operation abandoned while in flight");
            }
        }
    }
}
