//! Job workers.
//!
//! - `handler`: the `JobHandler` trait every queue consumer implements
//! - `pool`: consumer loops: lease, run under a deadline, ack/nack
//! - `lifecycle` / `webhook` / `alert`: the handler for each queue

pub mod alert;
pub mod handler;
pub mod lifecycle;
pub mod pool;
pub mod webhook;

pub use alert::AlertHandler;
pub use handler::{JobHandler, JobOutcome};
pub use lifecycle::{AgentController, HttpAgentController, LifecycleHandler};
pub use pool::{WorkerConfig, WorkerPool};
pub use webhook::WebhookHandler;
