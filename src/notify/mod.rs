pub mod reminder;
pub mod scheduler;
pub mod settings;

pub use reminder::{ConsoleNotifier, Notifier, Permission, Reminder};
pub use scheduler::{NotificationScheduler, NotificationStatus, REMINDER_INTERVAL, next_delay};
pub use settings::NotificationSettings;
