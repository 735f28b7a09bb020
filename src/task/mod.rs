pub mod item;
pub mod priority;
pub mod view;

pub use item::{Task, TaskDraft, TaskId, TaskPatch};
pub use priority::{Level, Priority};
pub use view::{Filter, TaskStats, render, sort_by_priority, top_pending};
