pub mod locks;
pub mod telemetry;
pub mod work_items;
pub mod workers;
