//! Deadline helpers shared by the engine and the transport adapters.

use std::io;
use std::time::{Duration, Instant};

/// Returns true if a transport error means a deadline elapsed.
///
/// Std sockets report an expired read/write timeout as `WouldBlock` on unix
/// and `TimedOut` on windows; both count.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Error returned when a deadline has already elapsed.
pub fn deadline_elapsed() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline elapsed")
}

/// Converts an absolute deadline into a relative timeout for socket options.
///
/// `None` means block indefinitely. A deadline at or before now fails with a
/// `TimedOut` error instead of producing a zero timeout, which std rejects.
pub fn timeout_until(deadline: Option<Instant>) -> io::Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                return Err(deadline_elapsed());
            }
            Ok(Some(deadline - now))
        }
    }
}
