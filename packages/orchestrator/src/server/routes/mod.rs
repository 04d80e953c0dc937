pub mod health;
pub mod status;
pub mod work;
pub mod worker;

pub use health::health_handler;
pub use status::status_handler;
pub use work::{
    add_work_handler, cancel_work_handler, get_work_handler, list_work_handler, metrics_handler,
    queue_handler, spec_writeback_handler,
};
pub use worker::{
    complete_handler, fail_handler, heartbeat_handler, kill_worker_handler, list_workers_handler,
    lock_handler, register_handler, stuck_handler, unlock_handler,
};
