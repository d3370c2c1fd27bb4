//! Retry loop for transient storage interruptions.
//!
//! Every backend adapter routes its reads and writes through [`with_backoff`]. Errors for
//! which [`RelationsError::is_transient`] is false are returned on the first attempt.
//! Transient errors are retried with exponential backoff until the policy's `max_elapsed`
//! ceiling is reached, at which point [`RelationsError::ConnectionFailed`] is returned.

use std::time::{Duration, Instant};

use log::{error, warn};

use crate::config::RetryPolicy;
use crate::error::{RelationsError, RelationsResult};

/// Run `op`, retrying transient failures according to `policy`.
pub fn with_backoff<T, F>(policy: &RetryPolicy, operation: &str, mut op: F) -> RelationsResult<T>
where
    F: FnMut() -> RelationsResult<T>,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                let elapsed = started.elapsed();
                if elapsed + delay >= policy.max_elapsed {
                    error!(
                        "Timed out reconnecting during {} after {} attempts: {}",
                        operation, attempts, err
                    );
                    return Err(RelationsError::ConnectionFailed {
                        operation: operation.to_string(),
                        attempts,
                        elapsed,
                        last_error: err.to_string(),
                    });
                }
                warn!(
                    "Storage interrupted during {} ({}), retrying in {:?}",
                    operation, err, delay
                );
                sleep(delay);
                delay = policy.next_delay(delay);
            }
        }
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
