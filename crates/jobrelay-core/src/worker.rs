//! Worker records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, ResourceId, Result};

/// Last known liveness of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "ONLINE",
            WorkerStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ONLINE" => Ok(WorkerStatus::Online),
            "OFFLINE" => Ok(WorkerStatus::Offline),
            other => Err(Error::Validation(format!("unknown worker status: {}", other))),
        }
    }
}

/// A registered worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: ResourceId,
    pub hostname: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl Worker {
    pub fn register(hostname: impl Into<String>, now: DateTime<Utc>) -> Result<Self> {
        let hostname = hostname.into().trim().to_string();
        if hostname.is_empty() {
            return Err(Error::Validation("hostname must not be empty".to_string()));
        }
        Ok(Self {
            id: ResourceId::new(),
            hostname,
            status: WorkerStatus::Online,
            last_heartbeat: now,
        })
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        self.status = WorkerStatus::Online;
    }

    /// Whether the heartbeat is older than `threshold` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_heartbeat) > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_requires_hostname() {
        assert!(Worker::register("   ", Utc::now()).is_err());
        let worker = Worker::register("node-1", Utc::now()).unwrap();
        assert_eq!(worker.status, WorkerStatus::Online);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let mut worker = Worker::register("node-1", now).unwrap();
        let later = now + chrono::Duration::seconds(20);
        assert!(worker.is_stale(later, Duration::from_secs(15)));
        assert!(!worker.is_stale(later, Duration::from_secs(30)));

        worker.status = WorkerStatus::Offline;
        worker.heartbeat(later);
        assert_eq!(worker.status, WorkerStatus::Online);
        assert!(!worker.is_stale(later, Duration::from_secs(15)));
    }
}
