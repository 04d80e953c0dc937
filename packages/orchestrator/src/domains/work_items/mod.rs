pub mod models;
pub mod queue;

pub use models::{NewWorkItem, WorkItem, WorkItemPriority, WorkItemStatus, WorkItemType};
pub use queue::{AddWorkItemRequest, QueueManager};
