pub mod manager;
pub mod models;

pub use manager::{CompletionReport, WorkerManager, WorkerManagerConfig};
pub use models::{Worker, WorkerStats, WorkerStatus};
