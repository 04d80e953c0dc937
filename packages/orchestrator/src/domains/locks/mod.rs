pub mod models;
pub mod service;

pub use models::FileLock;
pub use service::{LockOutcome, LockService};
