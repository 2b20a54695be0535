//! Retry logic for filesystem operations that can fail transiently.
//!
//! Archives live in folders that other programs touch (the game itself, sync
//! clients, virus scanners), so a stat or rename can hit a locked file. Such
//! operations are retried with a linear backoff; everything else fails fast.

use anyhow::{Result, anyhow};
use log::{debug, warn};
use std::io;
use std::time::Duration;

/// Maximum number of attempts for a single filesystem operation.
pub const MAX_RETRIES: u32 = 3;

/// Backoff unit; attempt `n` waits `n * RETRY_DELAY_MS` before the next try.
pub const RETRY_DELAY_MS: u64 = 200;

/// Windows `ERROR_SHARING_VIOLATION` and `ERROR_LOCK_VIOLATION`.
const WINDOWS_SHARING_VIOLATION: i32 = 32;
const WINDOWS_LOCK_VIOLATION: i32 = 33;

/// Checks whether an error is a transient IO failure worth retrying.
pub fn is_transient_error(e: &anyhow::Error) -> bool {
    let Some(io_error) = e.chain().find_map(|c| c.downcast_ref::<io::Error>()) else {
        return false;
    };

    if cfg!(windows)
        && matches!(
            io_error.raw_os_error(),
            Some(WINDOWS_SHARING_VIOLATION) | Some(WINDOWS_LOCK_VIOLATION)
        )
    {
        return true;
    }

    matches!(
        io_error.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}

/// Executes a blocking filesystem operation with retry logic.
///
/// Only transient IO errors are retried. The error of the final attempt is
/// returned to the caller of this one operation.
pub fn with_retry<F, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error = None;

    for attempt in 1..=MAX_RETRIES {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_transient_error(&e) {
                    debug!("{}: non-retryable error: {:#}", operation_name, e);
                    return Err(e);
                }

                if attempt < MAX_RETRIES {
                    let delay = RETRY_DELAY_MS * u64::from(attempt);
                    warn!(
                        "{}: attempt {}/{} failed ({:#}), retrying in {}ms...",
                        operation_name, attempt, MAX_RETRIES, e, delay
                    );
                    std::thread::sleep(Duration::from_millis(delay));
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("{}: failed after {} attempts", operation_name, MAX_RETRIES)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::time::Instant;

    fn io_err(kind: io::ErrorKind) -> anyhow::Error {
        anyhow::Error::from(io::Error::new(kind, "simulated"))
    }

    #[test]
    fn test_with_retry_success() {
        let result = with_retry("test", || Ok::<_, anyhow::Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_is_transient_error_kinds() {
        assert!(is_transient_error(&io_err(io::ErrorKind::PermissionDenied)));
        assert!(is_transient_error(&io_err(io::ErrorKind::Interrupted)));
        assert!(is_transient_error(&io_err(io::ErrorKind::TimedOut)));
        assert!(!is_transient_error(&io_err(io::ErrorKind::NotFound)));
        assert!(!is_transient_error(&anyhow!("some other error")));
    }

    #[test]
    fn test_is_transient_error_through_context() {
        let err = Err::<(), _>(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
            .context("Failed to stat file")
            .unwrap_err();
        assert!(is_transient_error(&err));
    }

    #[test]
    fn test_with_retry_immediate_failure_on_non_transient() {
        let mut attempts = 0;
        let start = Instant::now();
        let result = with_retry("test", || {
            attempts += 1;
            Err::<i32, _>(io_err(io::ErrorKind::NotFound))
        });

        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert!(start.elapsed() < Duration::from_millis(RETRY_DELAY_MS));
    }

    #[test]
    fn test_with_retry_recovers_from_transient_error() {
        let mut attempts = 0;
        let result = with_retry("test", || {
            attempts += 1;
            if attempts < 2 {
                Err(io_err(io::ErrorKind::PermissionDenied))
            } else {
                Ok(7)
            }
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_with_retry_exhausts_retries_with_backoff() {
        let mut attempts = 0;
        let start = Instant::now();
        let result = with_retry("test", || {
            attempts += 1;
            Err::<i32, _>(io_err(io::ErrorKind::WouldBlock))
        });

        assert!(result.is_err());
        assert_eq!(attempts, MAX_RETRIES);
        // 200ms after the first attempt, 400ms after the second
        assert!(start.elapsed() >= Duration::from_millis(600));
    }
}
