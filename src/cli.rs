use clap::{Args, Parser, Subcommand};

use taskwise::task::{Filter, Level, Priority};

#[derive(Parser, Debug)]
#[command(name = "taskwise")]
#[command(about = "Task tracking with weighted priorities, guest mode and reminders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides config and HOST)
        #[arg(long)]
        host: Option<String>,
    },
    /// Add a task
    Add {
        text: String,

        #[command(flatten)]
        priority: PriorityArgs,
    },
    /// List tasks, highest priority first
    List {
        /// all, pending or completed
        #[arg(short, long, default_value = "all")]
        filter: Filter,
    },
    /// Mark a task done, or not done
    Toggle {
        /// Task id or a unique prefix of it
        id: String,
    },
    /// Change a task's text or priority factors
    Edit {
        id: String,

        #[arg(short, long)]
        text: Option<String>,

        #[command(flatten)]
        priority: PriorityArgs,
    },
    /// Delete a task
    Rm { id: String },
    /// Continue without an account
    Guest,
    /// Sign in with an identity provider credential
    Login { credential: String },
    /// Prepare to move guest tasks into an account
    Upgrade,
    /// Retry copying guest tasks after a failed sign-in migration
    Migrate,
    /// Sign out of the current session
    Logout,
    /// Show the current session
    Whoami,
    /// Manage task reminders
    Notify {
        #[command(subcommand)]
        command: NotifyCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum NotifyCommand {
    /// Ask for permission and turn reminders on
    Enable,
    /// Turn reminders off
    Disable,
    /// Show reminder settings
    Status,
    /// Show the top-priority reminder right away
    Now,
}

/// Priority factors. Each takes 1-3 or low/medium/high.
#[derive(Args, Debug, Clone, Default)]
pub struct PriorityArgs {
    #[arg(short = 'i', long)]
    pub importance: Option<Level>,

    #[arg(short = 'u', long)]
    pub urgency: Option<Level>,

    #[arg(short = 'e', long)]
    pub easiness: Option<Level>,

    #[arg(short = 'n', long)]
    pub interest: Option<Level>,

    #[arg(short = 'd', long)]
    pub dependency: Option<Level>,
}

impl PriorityArgs {
    pub fn is_empty(&self) -> bool {
        self.importance.is_none()
            && self.urgency.is_none()
            && self.easiness.is_none()
            && self.interest.is_none()
            && self.dependency.is_none()
    }

    /// Given factors replace the ones in `base`.
    pub fn over(&self, base: Priority) -> Priority {
        Priority::new(
            self.importance.unwrap_or(base.importance),
            self.urgency.unwrap_or(base.urgency),
            self.easiness.unwrap_or(base.easiness),
            self.interest.unwrap_or(base.interest),
            self.dependency.unwrap_or(base.dependency),
        )
    }
}
