//! KDL configuration parsing for jobrelay.
//!
//! Both the orchestrator server and the worker read the same `jobrelay.kdl`;
//! each uses its own section. Every setting has a default so an absent file
//! is a valid configuration.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{LogFormat, OrchestratorConfig, SystemConfig, WorkerConfig};
