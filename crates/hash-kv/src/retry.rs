//! Bounded retry for transient storage failures.

use std::time::Duration;

use crate::error::KvError;

/// Matches the original engine's retry budget: ten attempts, 50ms apart,
/// before giving up and surfacing the failure.
const MAX_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Run `f`, retrying up to [`MAX_ATTEMPTS`] times with a fixed delay when it
/// returns [`KvError::Io`] or [`KvError::Storage`] — the categories that can
/// plausibly be transient (another process briefly holding a lock, a
/// momentary filesystem hiccup). Any other error returns immediately.
pub fn with_retry<T>(op: &str, mut f: impl FnMut() -> Result<T, KvError>) -> Result<T, KvError> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err @ (KvError::Io(_) | KvError::Storage(_))) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    tracing::warn!(op, attempt, "giving up after repeated storage failures");
                    return Err(err);
                }
                tracing::debug!(op, attempt, %err, "retrying storage operation");
                std::thread::sleep(RETRY_DELAY);
            }
            Err(other) => return Err(other),
        }
    }
}
