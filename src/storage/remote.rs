//! Durable per-user task collections in SQLite.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{CHANGE_FEED_CAPACITY, Scope, TaskBackend};
use crate::error::{Error, Result};
use crate::task::{Level, Priority, Task, TaskDraft, TaskId, TaskPatch};

const TASK_COLUMNS: &str = "id, text, completed, importance, urgency, easiness, interest, dependency, created_at, updated_at";

/// Parse an RFC3339 timestamp string into a DateTime<Utc>
fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fixed-width UTC form, so text ordering in SQL matches time ordering.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the table stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Raw data extracted from a database row before conversion to Task
struct TaskRowData {
    id: String,
    text: String,
    completed: i64,
    factors: [i64; 5],
    created_at_str: String,
    updated_at_str: String,
}

impl TaskRowData {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            text: row.get(1)?,
            completed: row.get(2)?,
            factors: [row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
            created_at_str: row.get(8)?,
            updated_at_str: row.get(9)?,
        })
    }

    fn into_task(self) -> Task {
        let [importance, urgency, easiness, interest, dependency] =
            self.factors.map(Level::clamp_from);
        let created_at = parse_rfc3339(&self.created_at_str).unwrap_or_default();
        let updated_at = parse_rfc3339(&self.updated_at_str).unwrap_or(created_at);

        Task {
            id: TaskId::from(self.id),
            text: self.text,
            completed: self.completed != 0,
            priority: Priority::new(importance, urgency, easiness, interest, dependency),
            created_at,
            updated_at,
        }
    }
}

pub struct RemoteBackend {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<Scope>,
}

impl RemoteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened task database at {:?}", path);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::sync("database connection lock poisoned", false))
    }

    fn notify(&self, scope: &Scope) {
        let _ = self.changes.send(scope.clone());
    }
}

fn user_id(scope: &Scope) -> Result<&str> {
    match scope {
        Scope::User(id) => Ok(id.as_str()),
        Scope::Guest(_) => Err(Error::Permission(format!(
            "the shared task store requires a signed-in user, not {scope}"
        ))),
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            text TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            importance INTEGER NOT NULL DEFAULT 1,
            urgency INTEGER NOT NULL DEFAULT 1,
            easiness INTEGER NOT NULL DEFAULT 1,
            interest INTEGER NOT NULL DEFAULT 1,
            dependency INTEGER NOT NULL DEFAULT 1,
            total_score INTEGER NOT NULL DEFAULT 15,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)",
        [],
    )?;

    Ok(())
}

fn select_task(conn: &Connection, user_id: &str, id: &TaskId) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 AND id = ?2");
    let row = conn
        .query_row(&sql, params![user_id, id.as_str()], TaskRowData::from_row)
        .optional()?;
    Ok(row.map(TaskRowData::into_task))
}

/// Writes every column of `task`, including the derived `total_score`.
fn write_task(conn: &Connection, user_id: &str, task: &Task) -> Result<()> {
    let p = task.priority;
    conn.execute(
        "INSERT INTO tasks (id, user_id, text, completed, importance, urgency, easiness, interest, dependency, total_score, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            completed = excluded.completed,
            importance = excluded.importance,
            urgency = excluded.urgency,
            easiness = excluded.easiness,
            interest = excluded.interest,
            dependency = excluded.dependency,
            total_score = excluded.total_score,
            updated_at = excluded.updated_at",
        params![
            task.id.as_str(),
            user_id,
            task.text,
            task.completed as i64,
            p.importance.value(),
            p.urgency.value(),
            p.easiness.value(),
            p.interest.value(),
            p.dependency.value(),
            task.total_score(),
            format_timestamp(task.created_at),
            format_timestamp(task.updated_at),
        ],
    )?;
    Ok(())
}

impl TaskBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn load(&self, scope: &Scope) -> Result<Vec<Task>> {
        let user_id = user_id(scope)?;
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], TaskRowData::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_task());
        }
        Ok(result)
    }

    fn insert(&self, scope: &Scope, draft: TaskDraft) -> Result<Task> {
        let user_id = user_id(scope)?;
        let task = Task::from_draft(draft, now());
        {
            let conn = self.lock()?;
            write_task(&conn, user_id, &task)?;
        }
        debug!("Inserted task {} for {}", task.id, scope);
        self.notify(scope);
        Ok(task)
    }

    fn update(&self, scope: &Scope, id: &TaskId, patch: &TaskPatch) -> Result<Option<Task>> {
        let user_id = user_id(scope)?;
        let updated = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let Some(mut task) = select_task(&tx, user_id, id)? else {
                return Ok(None);
            };
            task.apply(patch, now());
            write_task(&tx, user_id, &task)?;
            tx.commit()?;
            task
        };
        self.notify(scope);
        Ok(Some(updated))
    }

    fn delete(&self, scope: &Scope, id: &TaskId) -> Result<bool> {
        let user_id = user_id(scope)?;
        let deleted = {
            let conn = self.lock()?;
            conn.execute(
                "DELETE FROM tasks WHERE user_id = ?1 AND id = ?2",
                params![user_id, id.as_str()],
            )?
        };
        if deleted > 0 {
            self.notify(scope);
        }
        Ok(deleted > 0)
    }

    fn clear(&self, scope: &Scope) -> Result<usize> {
        let user_id = user_id(scope)?;
        let removed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM tasks WHERE user_id = ?1", params![user_id])?
        };
        self.notify(scope);
        Ok(removed)
    }

    fn changes(&self) -> broadcast::Receiver<Scope> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user() -> Scope {
        Scope::User("google-sub-1".to_string())
    }

    fn draft(text: &str, priority: Priority) -> TaskDraft {
        TaskDraft::new(text, priority).unwrap()
    }

    #[test]
    fn test_database_schema() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let conn = backend.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tasks'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_insert_and_load_newest_first() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let first = backend.insert(&user(), draft("first", Priority::default())).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = backend.insert(&user(), draft("second", Priority::default())).unwrap();

        let loaded = backend.load(&user()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, second.id);
        assert_eq!(loaded[1].id, first.id);
    }

    #[test]
    fn test_total_score_column_rewritten_on_edit() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let task = backend.insert(&user(), draft("plan trip", Priority::default())).unwrap();

        let stored_score = |backend: &RemoteBackend| -> i64 {
            backend
                .lock()
                .unwrap()
                .query_row(
                    "SELECT total_score FROM tasks WHERE id = ?1",
                    params![task.id.as_str()],
                    |row| row.get(0),
                )
                .unwrap()
        };
        assert_eq!(stored_score(&backend), 15);

        let patch = TaskPatch::edit(None, Some(Priority::uniform(Level::High))).unwrap();
        backend.update(&user(), &task.id, &patch).unwrap();
        assert_eq!(stored_score(&backend), 45);
    }

    #[test]
    fn test_update_preserves_created_at() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let task = backend.insert(&user(), draft("plan trip", Priority::default())).unwrap();
        let updated = backend
            .update(&user(), &task.id, &TaskPatch::completion(true))
            .unwrap()
            .unwrap();

        assert!(updated.completed);
        assert_eq!(updated.text, "plan trip");
        assert_eq!(updated.created_at, task.created_at);
    }

    #[test]
    fn test_update_and_delete_unknown_id() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let missing = TaskId::from("missing");
        assert!(backend
            .update(&user(), &missing, &TaskPatch::completion(true))
            .unwrap()
            .is_none());
        assert!(!backend.delete(&user(), &missing).unwrap());
    }

    #[test]
    fn test_users_are_isolated() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let task = backend.insert(&user(), draft("private", Priority::default())).unwrap();
        let other = Scope::User("someone-else".into());

        assert!(backend.load(&other).unwrap().is_empty());
        assert!(!backend.delete(&other, &task.id).unwrap());
        assert_eq!(backend.load(&user()).unwrap().len(), 1);
    }

    #[test]
    fn test_guest_scope_is_refused() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let err = backend.load(&Scope::Guest("guest_1".into())).unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.db");
        {
            let backend = RemoteBackend::open(&path).unwrap();
            backend.insert(&user(), draft("durable", Priority::default())).unwrap();
        }
        let backend = RemoteBackend::open(&path).unwrap();
        let loaded = backend.load(&user()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "durable");
    }

    #[test]
    fn test_clear_only_touches_scope() {
        let backend = RemoteBackend::open_in_memory().unwrap();
        let other = Scope::User("other".into());
        backend.insert(&user(), draft("a", Priority::default())).unwrap();
        backend.insert(&other, draft("b", Priority::default())).unwrap();

        assert_eq!(backend.clear(&user()).unwrap(), 1);
        assert_eq!(backend.load(&other).unwrap().len(), 1);
    }
}
