//! Agent orchestrator: durable job queues, workers, and the tool capability gate.

pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod notify;
pub mod ops;
pub mod queue;
pub mod worker;
