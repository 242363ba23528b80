use std::any::Any;
use std::io;

/// Result alias used across the crate. Task bodies return this so that `?`
/// propagates failures along await edges.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A centralized error type for everything a task can fail with.
///
/// Failures travel along await edges: a failed child's slot holds one of
/// these, the awaiting parent re-raises it in its own body, and an unhandled
/// failure in a task with no continuation is returned from
/// [`Scheduler::run`](crate::Scheduler::run).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O submission or completion reported failure.
    #[error("i/o operation failed: {0}")]
    Io(#[from] io::Error),

    /// A task body panicked. The payload is rendered to a message; the
    /// original payload is not carried across threads.
    #[error("task panicked: {0}")]
    Panic(String),

    /// A task body returned an application error.
    #[error(transparent)]
    App(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Error {
        let msg = panic_payload_as_str(&payload).unwrap_or("non-string panic payload");
        Error::Panic(msg.to_string())
    }
}

/// Panic payloads are almost always `&str` or `String`; anything else is
/// reported opaquely.
pub(crate) fn panic_payload_as_str<'a>(payload: &'a Box<dyn Any + Send + 'static>) -> Option<&'a str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// A broken runtime invariant: double schedule, ready-queue overflow, a
/// corrupted state word. These are bugs, not recoverable errors, and
/// continuing would corrupt frame ownership. Diagnose and abort.
#[cold]
pub(crate) fn fatal(msg: &str) -> ! {
    tracing::error!(target: "weft", "fatal runtime invariant violated: {msg}");
    eprintln!("weft: fatal runtime invariant violated: {msg}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn panic_payload_rendering() {
        let e = Error::from_panic(Box::new("boom"));
        assert!(matches!(&e, Error::Panic(m) if m == "boom"));

        let e = Error::from_panic(Box::new(String::from("later boom")));
        assert!(matches!(&e, Error::Panic(m) if m == "later boom"));

        let e = Error::from_panic(Box::new(17_u32));
        assert!(matches!(&e, Error::Panic(m) if m.contains("non-string")));
    }

    #[test]
    fn conversions() {
        let e: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(e, Error::Io(_)));

        let e: Error = anyhow!("app failure").into();
        assert!(matches!(e, Error::App(_)));
    }
}
