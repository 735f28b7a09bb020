//! Scope-bound task store with a live snapshot channel.
//!
//! A [`TaskStore`] is bound to at most one [`Scope`] at a time. While bound it
//! listens to the backend's change feed and republishes the full task list
//! whenever anything (this store, another session, another process sharing
//! the backend) writes to the scope. Subscribers always receive whole lists;
//! the latest snapshot wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Scope, TaskBackend};
use crate::error::{Error, Result};
use crate::task::{Priority, Task, TaskDraft, TaskId, TaskPatch};

/// The two interchangeable persistence modes.
#[derive(Clone)]
pub struct Backends {
    pub local: Arc<dyn TaskBackend>,
    pub remote: Arc<dyn TaskBackend>,
}

impl Backends {
    pub fn new(local: Arc<dyn TaskBackend>, remote: Arc<dyn TaskBackend>) -> Self {
        Self { local, remote }
    }

    pub fn for_scope(&self, scope: &Scope) -> Arc<dyn TaskBackend> {
        match scope {
            Scope::Guest(_) => Arc::clone(&self.local),
            Scope::User(_) => Arc::clone(&self.remote),
        }
    }
}

/// Snapshot channel guarded by a binding epoch and load tickets.
///
/// Every load takes a ticket before it reads the backend. A snapshot is only
/// published if its epoch is still current (so a reload finishing after
/// `unbind` cannot leak the previous scope's tasks) and its ticket is newer
/// than the last one published (so a slow reload cannot overwrite the result
/// of a later one).
struct Feed {
    epoch: AtomicU64,
    tickets: AtomicU64,
    published: AtomicU64,
    tx: watch::Sender<Vec<Task>>,
}

impl Feed {
    fn ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns false once `epoch` is stale.
    fn publish(&self, epoch: u64, ticket: u64, tasks: Vec<Task>) -> bool {
        let mut current = true;
        self.tx.send_if_modified(|snapshot| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                current = false;
                return false;
            }
            if ticket <= self.published.load(Ordering::SeqCst) {
                return false;
            }
            self.published.store(ticket, Ordering::SeqCst);
            *snapshot = tasks;
            true
        });
        current
    }

    fn reset(&self) -> u64 {
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(Vec::new());
        next
    }

    async fn load(&self, backend: &Arc<dyn TaskBackend>, scope: &Scope) -> Result<(u64, Vec<Task>)> {
        let ticket = self.ticket();
        let tasks = run_blocking(backend, scope, |backend, scope| backend.load(scope)).await?;
        Ok((ticket, tasks))
    }
}

struct Binding {
    scope: Scope,
    backend: Arc<dyn TaskBackend>,
    epoch: u64,
    listener: JoinHandle<()>,
}

pub struct TaskStore {
    backends: Backends,
    feed: Arc<Feed>,
    binding: Option<Binding>,
}

impl TaskStore {
    pub fn new(backends: Backends) -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            backends,
            feed: Arc::new(Feed {
                epoch: AtomicU64::new(0),
                tickets: AtomicU64::new(0),
                published: AtomicU64::new(0),
                tx,
            }),
            binding: None,
        }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.binding.as_ref().map(|binding| &binding.scope)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Current in-memory snapshot.
    pub fn tasks(&self) -> Vec<Task> {
        self.feed.tx.borrow().clone()
    }

    /// Receiver for every snapshot published from now on. Stays valid across
    /// bind/unbind; an unbound store publishes an empty list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.feed.tx.subscribe()
    }

    /// Attach to `scope`, publish its current tasks and start following
    /// its changes.
    pub async fn bind(&mut self, scope: Scope) -> Result<()> {
        if let Some(binding) = &self.binding {
            return Err(Error::InvalidState(format!(
                "task store is already bound to {}; unbind first",
                binding.scope
            )));
        }

        let backend = self.backends.for_scope(&scope);
        // Subscribe before the first load so no write slips between the two.
        let changes = backend.changes();
        let (ticket, tasks) = self.feed.load(&backend, &scope).await?;

        let epoch = self.feed.reset();
        let count = tasks.len();
        self.feed.publish(epoch, ticket, tasks);

        let listener = tokio::spawn(follow_changes(
            Arc::clone(&backend),
            scope.clone(),
            changes,
            Arc::clone(&self.feed),
            epoch,
        ));

        info!(
            "Task store bound to {} ({} backend, {} tasks)",
            scope,
            backend.name(),
            count
        );
        self.binding = Some(Binding {
            scope,
            backend,
            epoch,
            listener,
        });
        Ok(())
    }

    /// Stop following the bound scope and drop the in-memory list.
    pub fn unbind(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.listener.abort();
            self.feed.reset();
            info!("Task store unbound from {}", binding.scope);
        }
    }

    pub async fn create(&self, text: &str, priority: Priority) -> Result<Task> {
        let draft = TaskDraft::new(text, priority)?;
        let binding = self.binding()?;

        let task = run_blocking(&binding.backend, &binding.scope, move |backend, scope| {
            backend.insert(scope, draft)
        })
        .await?;

        debug!("Created task {} in {}", task.id, binding.scope);
        self.refresh(binding).await;
        Ok(task)
    }

    /// Flip `completed`. Unknown ids are ignored; the UI may hold stale ones.
    pub async fn toggle_completion(&self, id: &TaskId) -> Result<Option<Task>> {
        let binding = self.binding()?;
        let current = self
            .feed
            .tx
            .borrow()
            .iter()
            .find(|task| &task.id == id)
            .map(|task| task.completed);
        let Some(completed) = current else {
            debug!("Toggle ignored, no task {} in {}", id, binding.scope);
            return Ok(None);
        };

        self.apply_patch(binding, id, TaskPatch::completion(!completed))
            .await
    }

    pub async fn update(
        &self,
        id: &TaskId,
        text: Option<&str>,
        priority: Option<Priority>,
    ) -> Result<Option<Task>> {
        let patch = TaskPatch::edit(text, priority)?;
        let binding = self.binding()?;
        self.apply_patch(binding, id, patch).await
    }

    /// Delete `id`. Deleting something that is not there is not an error.
    pub async fn remove(&self, id: &TaskId) -> Result<bool> {
        let binding = self.binding()?;
        let target = id.clone();
        let removed = run_blocking(&binding.backend, &binding.scope, move |backend, scope| {
            backend.delete(scope, &target)
        })
        .await?;

        if removed {
            self.refresh(binding).await;
        }
        Ok(removed)
    }

    /// Wipe the persisted data of any scope, bound or not.
    pub async fn clear_scope(&self, scope: &Scope) -> Result<usize> {
        let backend = self.backends.for_scope(scope);
        let removed = run_blocking(&backend, scope, |backend, scope| backend.clear(scope)).await?;
        if let Some(binding) = &self.binding
            && &binding.scope == scope
        {
            self.refresh(binding).await;
        }
        info!("Cleared {} tasks from {}", removed, scope);
        Ok(removed)
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding
            .as_ref()
            .ok_or_else(|| Error::InvalidState("task store is not bound to a scope".into()))
    }

    async fn apply_patch(
        &self,
        binding: &Binding,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Option<Task>> {
        let target = id.clone();
        let updated = run_blocking(&binding.backend, &binding.scope, move |backend, scope| {
            backend.update(scope, &target, &patch)
        })
        .await?;

        if updated.is_some() {
            self.refresh(binding).await;
        }
        Ok(updated)
    }

    /// Republish from the backend after our own write. The write already
    /// succeeded, so a failed reload only leaves the older snapshot up until
    /// the listener's next reload.
    async fn refresh(&self, binding: &Binding) {
        match self.feed.load(&binding.backend, &binding.scope).await {
            Ok((ticket, tasks)) => {
                self.feed.publish(binding.epoch, ticket, tasks);
            }
            Err(e) => warn!("Reload of {} after write failed: {}", binding.scope, e),
        }
    }
}

impl Drop for TaskStore {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.listener.abort();
        }
    }
}

async fn run_blocking<T, F>(backend: &Arc<dyn TaskBackend>, scope: &Scope, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn TaskBackend, &Scope) -> Result<T> + Send + 'static,
{
    let backend = Arc::clone(backend);
    let scope = scope.clone();
    tokio::task::spawn_blocking(move || f(backend.as_ref(), &scope)).await?
}

async fn follow_changes(
    backend: Arc<dyn TaskBackend>,
    scope: Scope,
    mut changes: broadcast::Receiver<Scope>,
    feed: Arc<Feed>,
    epoch: u64,
) {
    loop {
        match changes.recv().await {
            Ok(changed) if changed != scope => continue,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Change feed for {} lagged by {}, reloading", scope, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        match feed.load(&backend, &scope).await {
            Ok((ticket, tasks)) => {
                debug!("Snapshot for {}: {} tasks", scope, tasks.len());
                if !feed.publish(epoch, ticket, tasks) {
                    break;
                }
            }
            Err(e) => warn!("Failed to sync tasks for {}: {}", scope, e),
        }
    }
}
