//! Completion-based asynchronous file I/O.
//!
//! A task awaiting one of these operations releases its worker thread until
//! the kernel reports completion; the wake-up arrives from the reactor
//! thread, never from a worker.

mod fs;
pub use self::fs::{read_file, write_file};

pub(crate) mod reactor;

#[cfg(test)]
mod tests;
