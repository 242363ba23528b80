//! A small multi-worker task runtime.
//!
//! `weft` runs lazily-started tasks (heap-framed, hand-laid-out futures) on a
//! fixed pool of OS threads sharing one bounded FIFO ready queue — no work
//! stealing, no priorities, no timers. Tasks compose structurally: awaiting a
//! [`Task`] suspends the parent on that one child, [`join_all`] suspends it
//! on a batch and yields results in input order. File I/O goes through
//! io_uring; a task blocked on a read or write gives its worker back until
//! the kernel completes the transfer.
//!
//! ```no_run
//! use weft::{Scheduler, Task};
//!
//! fn add(a: i64, b: i64) -> Task<i64> {
//!     Task::new(async move { Ok(a + b) })
//! }
//!
//! let scheduler = Scheduler::new(4);
//! scheduler.schedule(Task::new(async {
//!     let one = add(1, 2).await?;
//!     let pairs = weft::join_all((0..3i64).map(|i| add(i, i))).await?;
//!     println!("{one} {pairs:?}");
//!     Ok(())
//! }));
//! scheduler.run().unwrap();
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod io;

mod queue;

pub mod runtime;
pub use runtime::{Builder, Scheduler};

pub mod task;
pub use task::{join_all, FrameAllocator, JoinAll, JoinOne, SystemFrames, Task};
