use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::task::{Level, Task, TaskId, top_pending};

/// What a reminder says. Built from the task list at the moment it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Reminder {
    Welcome,
    #[serde(rename_all = "camelCase")]
    Task {
        task_id: TaskId,
        text: String,
        level: Level,
    },
    AllClear,
}

impl Reminder {
    /// Reminder for the highest-priority pending task, or the all-clear.
    pub fn for_tasks(tasks: &[Task]) -> Self {
        match top_pending(tasks) {
            Some(task) => Reminder::Task {
                task_id: task.id.clone(),
                text: task.text.clone(),
                level: task.priority.level(),
            },
            None => Reminder::AllClear,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Reminder::Welcome => "TaskWise Notifications Enabled!".to_string(),
            Reminder::Task { level, .. } => format!("TaskWise - {level} Priority Task"),
            Reminder::AllClear => "TaskWise - All caught up!".to_string(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Reminder::Welcome => {
                "You'll receive reminders about your top priority tasks every 4 hours.".to_string()
            }
            Reminder::Task { text, .. } => format!("Focus on: {text}"),
            Reminder::AllClear => "Great job! You have no pending tasks right now.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

/// The platform's notification surface.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Ask the user. A denied answer is final; callers must not ask again.
    fn request_permission(&self) -> Permission;

    fn show(&self, reminder: &Reminder) -> Result<()>;
}

/// Prints reminders to stdout. Whether the user allows notifications is a
/// configuration setting, so the answer is known up front.
pub struct ConsoleNotifier {
    permitted: bool,
}

impl ConsoleNotifier {
    pub fn new(permitted: bool) -> Self {
        Self { permitted }
    }
}

impl Notifier for ConsoleNotifier {
    fn permission(&self) -> Permission {
        if self.permitted {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    fn request_permission(&self) -> Permission {
        self.permission()
    }

    fn show(&self, reminder: &Reminder) -> Result<()> {
        let title = reminder.title();
        let body = reminder.body();
        info!(%title, "Showing reminder");
        println!("🔔 {title}\n   {body}");
        Ok(())
    }
}
