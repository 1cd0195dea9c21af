//! Repository traits and implementations.

pub mod job;
pub mod memory;
pub mod worker;

pub use job::{JobRepo, PgJobRepo};
pub use memory::MemStore;
pub use worker::{PgWorkerRepo, WorkerRepo};
