//! Job execution backends for jobrelay workers.
//!
//! Provides the built-in executor used by the `jobrelay worker` command.
//! Real deployments plug in their own [`JobExecutor`].

pub mod builtin;

pub use builtin::BuiltinExecutor;
pub use jobrelay_core::executor::JobExecutor;
