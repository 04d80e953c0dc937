pub mod aggregator;
pub mod models;

pub use aggregator::FactoryMetrics;
pub use models::{Learning, MetricSample, WorkerMetric};
