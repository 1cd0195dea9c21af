//! Job dispatch for jobrelay.
//!
//! Wraps the record store behind the assignment protocol, wakes idle
//! workers through a best-effort notification queue, demotes workers that
//! stop heartbeating, and runs the worker-side claim/execute/report loop.

pub mod dispatcher;
pub mod monitor;
pub mod notify;
pub mod shutdown;
pub mod worker;

pub use dispatcher::{DEFAULT_STORE_TIMEOUT, Dispatcher, JobStats};
pub use monitor::{LivenessMonitor, OrphanReaper};
pub use notify::{MemoryWakeQueue, RedisWakeQueue, WakeQueue};
pub use shutdown::install_shutdown_handler;
pub use worker::{Coordinator, WorkerLoop, WorkerSettings};
