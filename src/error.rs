use core::fmt;

/// Errors surfaced by [`Engine::start`](crate::Engine::start).
///
/// Everything else on the scheduling path is deliberately not an error:
/// stale or finished handles passed to `block`/`unblock`/`sched` are silent
/// no-ops, and snapshot allocation failure is fatal to the process, since the
/// engine cannot suspend a context without a place for its stack bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// `start` was called from within a context of an already running engine.
    AlreadyRunning,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyRunning => f.write_str("engine is already running"),
        }
    }
}

impl core::error::Error for Error {}
