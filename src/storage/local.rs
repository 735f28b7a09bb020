//! Guest task storage: one JSON document per guest under the data directory.

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::{CHANGE_FEED_CAPACITY, Scope, TaskBackend};
use crate::error::{Error, Result};
use crate::task::{Task, TaskDraft, TaskId, TaskPatch};

pub struct LocalBackend {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the guest files.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<Scope>,
}

impl LocalBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn guest_file(&self, scope: &Scope) -> Result<PathBuf> {
        let Scope::Guest(guest_id) = scope else {
            return Err(Error::Permission(format!(
                "local storage only holds guest tasks, not {scope}"
            )));
        };
        let safe = !guest_id.is_empty()
            && guest_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe {
            return Err(Error::validation(format!("Invalid guest id: {guest_id}")));
        }
        Ok(self.dir.join(format!("{guest_id}.json")))
    }

    fn read(&self, path: &Path) -> Result<Vec<Task>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, path: &Path, tasks: &[Task]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(tasks)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::sync("guest storage lock poisoned", false))
    }

    fn notify(&self, scope: &Scope) {
        // No receivers just means nobody is bound to this scope right now.
        let _ = self.changes.send(scope.clone());
    }
}

impl TaskBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn load(&self, scope: &Scope) -> Result<Vec<Task>> {
        let path = self.guest_file(scope)?;
        self.read(&path)
    }

    fn insert(&self, scope: &Scope, draft: TaskDraft) -> Result<Task> {
        let path = self.guest_file(scope)?;
        let _guard = self.lock()?;

        let mut tasks = self.read(&path)?;
        let task = Task::from_draft(draft, Utc::now());
        tasks.push(task.clone());
        self.write(&path, &tasks)?;

        debug!("Saved guest task {} to {:?}", task.id, path);
        self.notify(scope);
        Ok(task)
    }

    fn update(&self, scope: &Scope, id: &TaskId, patch: &TaskPatch) -> Result<Option<Task>> {
        let path = self.guest_file(scope)?;
        let _guard = self.lock()?;

        let mut tasks = self.read(&path)?;
        let Some(task) = tasks.iter_mut().find(|task| &task.id == id) else {
            return Ok(None);
        };
        task.apply(patch, Utc::now());
        let updated = task.clone();
        self.write(&path, &tasks)?;

        self.notify(scope);
        Ok(Some(updated))
    }

    fn delete(&self, scope: &Scope, id: &TaskId) -> Result<bool> {
        let path = self.guest_file(scope)?;
        let _guard = self.lock()?;

        let mut tasks = self.read(&path)?;
        let before = tasks.len();
        tasks.retain(|task| &task.id != id);
        if tasks.len() == before {
            return Ok(false);
        }
        self.write(&path, &tasks)?;

        self.notify(scope);
        Ok(true)
    }

    fn clear(&self, scope: &Scope) -> Result<usize> {
        let path = self.guest_file(scope)?;
        let _guard = self.lock()?;

        let removed = self.read(&path).map(|tasks| tasks.len()).unwrap_or(0);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("Removed guest task file {:?}", path);
        }

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
    use crate::task::{Level, Priority};
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalBackend, Scope) {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().join("guest"));
        (temp, backend, Scope::Guest("guest_test".to_string()))
    }

    fn draft(text: &str) -> TaskDraft {
        TaskDraft::new(text, Priority::default()).unwrap()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let (_temp, backend, scope) = setup();
        assert!(backend.load(&scope).unwrap().is_empty());
    }

    #[test]
    fn test_insert_persists_to_disk() {
        let (_temp, backend, scope) = setup();
        let task = backend.insert(&scope, draft("Buy milk")).unwrap();

        let reopened = LocalBackend::new(backend.dir().to_path_buf());
        let loaded = reopened.load(&scope).unwrap();
        assert_eq!(loaded, vec![task]);
    }

    #[test]
    fn test_update_rewrites_priority_and_timestamp() {
        let (_temp, backend, scope) = setup();
        let task = backend.insert(&scope, draft("Buy milk")).unwrap();

        let patch = TaskPatch::edit(Some("Buy oat milk"), Some(Priority::uniform(Level::High))).unwrap();
        let updated = backend.update(&scope, &task.id, &patch).unwrap().unwrap();

        assert_eq!(updated.text, "Buy oat milk");
        assert_eq!(updated.total_score(), 45);
        assert!(updated.updated_at >= task.updated_at);

        let raw = fs::read_to_string(backend.guest_file(&scope).unwrap()).unwrap();
        assert!(raw.contains("\"totalScore\": 45"));
    }

    #[test]
    fn test_update_unknown_id() {
        let (_temp, backend, scope) = setup();
        let result = backend
            .update(&scope, &TaskId::from("nope"), &TaskPatch::completion(true))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_temp, backend, scope) = setup();
        let task = backend.insert(&scope, draft("Buy milk")).unwrap();
        assert!(backend.delete(&scope, &task.id).unwrap());
        assert!(!backend.delete(&scope, &task.id).unwrap());
        assert!(backend.load(&scope).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_file() {
        let (_temp, backend, scope) = setup();
        backend.insert(&scope, draft("a")).unwrap();
        backend.insert(&scope, draft("b")).unwrap();

        assert_eq!(backend.clear(&scope).unwrap(), 2);
        assert!(!backend.guest_file(&scope).unwrap().exists());
        assert_eq!(backend.clear(&scope).unwrap(), 0);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let (_temp, backend, scope) = setup();
        let other = Scope::Guest("guest_other".to_string());
        backend.insert(&scope, draft("mine")).unwrap();
        assert!(backend.load(&other).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_user_scope() {
        let (_temp, backend, _) = setup();
        let err = backend.load(&Scope::User("123".into())).unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
    }

    #[test]
    fn test_rejects_path_like_guest_id() {
        let (_temp, backend, _) = setup();
        let err = backend.load(&Scope::Guest("../escape".into())).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_corrupt_file_is_sync_error() {
        let (_temp, backend, scope) = setup();
        fs::create_dir_all(backend.dir()).unwrap();
        fs::write(backend.guest_file(&scope).unwrap(), "{not json").unwrap();
        assert!(matches!(backend.load(&scope), Err(Error::Sync { .. })));
    }

    #[test]
    fn test_writes_broadcast_scope() {
        let (_temp, backend, scope) = setup();
        let mut rx = backend.changes();
        backend.insert(&scope, draft("a")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), scope);
    }
}
