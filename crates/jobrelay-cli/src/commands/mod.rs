//! CLI command implementations.

pub mod jobs;
pub mod worker;
pub mod workers;
