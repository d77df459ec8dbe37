//! Concurrent email processing.
//!
//! `WorkerPool` owns N tasks pulling from one bounded queue. Each job runs
//! `EmailProcessor::process()` and answers through its `JobHandle`.

pub mod pool;

pub use pool::{JobHandle, WorkerPool};
