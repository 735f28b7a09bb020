pub mod local;
pub mod remote;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::task::{Task, TaskDraft, TaskId, TaskPatch};

pub use local::LocalBackend;
pub use remote::RemoteBackend;
pub use store::{Backends, TaskStore};

/// Capacity of each backend's change feed. Slow listeners that fall behind
/// just reload once they catch up.
pub(crate) const CHANGE_FEED_CAPACITY: usize = 64;

/// Identity-bound partition of task data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    /// Tasks kept on this machine for a guest session.
    Guest(String),
    /// Tasks kept in the durable store for an authenticated user.
    User(String),
}

impl Scope {
    pub fn key(&self) -> &str {
        match self {
            Scope::Guest(id) | Scope::User(id) => id,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Scope::Guest(_))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Guest(id) => write!(f, "guest:{id}"),
            Scope::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Collection-per-scope persistence with a change feed.
///
/// Calls are blocking; [`TaskStore`] moves them off the async runtime.
/// Implementations assign ids and timestamps, and broadcast the touched
/// scope after every successful write.
pub trait TaskBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self, scope: &Scope) -> Result<Vec<Task>>;

    fn insert(&self, scope: &Scope, draft: TaskDraft) -> Result<Task>;

    /// Returns `None` when no task with `id` exists in `scope`.
    fn update(&self, scope: &Scope, id: &TaskId, patch: &TaskPatch) -> Result<Option<Task>>;

    /// Returns whether a task was actually deleted.
    fn delete(&self, scope: &Scope, id: &TaskId) -> Result<bool>;

    /// Drops every task in `scope`, returning how many were removed.
    fn clear(&self, scope: &Scope) -> Result<usize>;

    fn changes(&self) -> broadcast::Receiver<Scope>;
}
