//! Retry decision for failed attempts.

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back to PENDING with the incremented retry count.
    Requeue { retry_count: i32 },
    /// Retries exhausted, the job becomes DEAD with its retry count unchanged.
    DeadLetter,
}

impl RetryDecision {
    /// Decide from the counters read under the row lock.
    pub fn decide(retry_count: i32, max_retries: i32) -> Self {
        let next = retry_count.saturating_add(1);
        if next > max_retries {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Requeue { retry_count: next }
        }
    }
}
