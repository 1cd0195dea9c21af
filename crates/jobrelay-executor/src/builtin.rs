//! Built-in job types.
//!
//! - `email`: takes two time units, succeeds
//! - `fail`: takes one time unit, always fails
//! - `sleep`: sleeps `payload.seconds` time units, succeeds
//! - anything else: takes one time unit, succeeds

use async_trait::async_trait;
use jobrelay_core::executor::JobExecutor;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const SIMULATED_FAILURE: &str = "simulated job failure";

#[derive(Debug, Deserialize)]
struct SleepPayload {
    seconds: f64,
}

/// Executor for the built-in simulated job types.
#[derive(Debug, Clone)]
pub struct BuiltinExecutor {
    /// Length of one time unit.
    unit: Duration,
}

impl BuiltinExecutor {
    pub fn new() -> Self {
        Self::with_unit(Duration::from_secs(1))
    }

    /// Scale every simulated duration, mostly so tests run fast.
    pub fn with_unit(unit: Duration) -> Self {
        Self { unit }
    }
}

impl Default for BuiltinExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobExecutor for BuiltinExecutor {
    fn name(&self) -> &'static str {
        "builtin"
    }

    async fn execute(&self, job_type: &str, payload: &serde_json::Value) -> Result<(), String> {
        debug!(job_type, "Executing built-in job");
        match job_type {
            "email" => {
                tokio::time::sleep(self.unit * 2).await;
                Ok(())
            }
            "fail" => {
                tokio::time::sleep(self.unit).await;
                Err(SIMULATED_FAILURE.to_string())
            }
            "sleep" => {
                let payload = SleepPayload::deserialize(payload)
                    .map_err(|e| format!("invalid sleep payload: {}", e))?;
                if !payload.seconds.is_finite() || payload.seconds < 0.0 {
                    return Err(format!("invalid sleep duration: {}", payload.seconds));
                }
                tokio::time::sleep(self.unit.mul_f64(payload.seconds)).await;
                Ok(())
            }
            _ => {
                tokio::time::sleep(self.unit).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast() -> BuiltinExecutor {
        BuiltinExecutor::with_unit(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_fail_type_fails() {
        let result = fast().execute("fail", &json!(null)).await;
        assert_eq!(result.unwrap_err(), SIMULATED_FAILURE);
    }

    #[tokio::test]
    async fn test_other_types_succeed() {
        assert!(fast().execute("email", &json!({})).await.is_ok());
        assert!(fast().execute("report", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_validates_payload() {
        assert!(fast().execute("sleep", &json!({"seconds": 2})).await.is_ok());
        assert!(fast().execute("sleep", &json!({})).await.is_err());
        assert!(fast().execute("sleep", &json!({"seconds": -1})).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_durations_follow_unit() {
        let executor = BuiltinExecutor::new();
        let start = tokio::time::Instant::now();
        executor.execute("email", &json!({})).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
