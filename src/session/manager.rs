//! Identity lifecycle: unauthenticated, guest, authenticated, and the guest
//! to account upgrade that carries tasks across.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::credential::Claims;
use super::identity::{Identity, PendingMigration, Profile, SessionState, SessionStatus};
use crate::error::{Error, Result};
use crate::storage::{Scope, TaskStore};

/// Result of copying pending guest tasks into an account.
#[derive(Debug)]
pub enum MigrationOutcome {
    /// There was nothing pending.
    NotNeeded,
    Completed { copied: usize },
    /// Signed in, but some tasks are still pending. Retry with
    /// [`SessionManager::retry_migration`].
    Failed(Error),
}

#[derive(Debug)]
pub struct SignInOutcome {
    pub profile: Profile,
    pub migration: MigrationOutcome,
}

pub struct SessionManager {
    store: TaskStore,
    state: SessionState,
    state_path: PathBuf,
}

impl SessionManager {
    /// Pick up the identity saved by the previous run and bind the store
    /// to its scope.
    pub async fn restore(mut store: TaskStore, state_path: impl Into<PathBuf>) -> Result<Self> {
        let state_path = state_path.into();
        let state = SessionState::load(&state_path)?;

        if let Some(scope) = state.identity.scope() {
            store.bind(scope).await?;
        }
        if let Some(pending) = &state.pending_migration {
            info!(
                "Session has {} guest tasks waiting to migrate",
                pending.tasks.len()
            );
        }

        Ok(Self {
            store,
            state,
            state_path,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.state.identity
    }

    pub fn status(&self) -> SessionStatus {
        self.state.identity.status()
    }

    pub fn pending_migration(&self) -> Option<&PendingMigration> {
        self.state.pending_migration.as_ref()
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Start a guest session. If an upgrade was started but never finished,
    /// this resumes that guest instead of minting a new one.
    pub async fn continue_as_guest(&mut self) -> Result<&Identity> {
        self.require(SessionStatus::Unauthenticated, "continue as guest")?;

        let identity = match &self.state.pending_migration {
            Some(pending) => Identity::Guest {
                local_id: pending.guest_id.clone(),
            },
            None => Identity::new_guest(),
        };
        if let Some(scope) = identity.scope() {
            self.store.bind(scope).await?;
        }

        self.state.pending_migration = None;
        self.state.identity = identity;
        self.save()?;

        info!("Continuing as guest ({})", self.state.identity.display_name());
        Ok(&self.state.identity)
    }

    /// Snapshot the guest's tasks and leave guest mode so the user can sign
    /// in. Returns how many tasks will be carried over.
    pub async fn begin_upgrade(&mut self) -> Result<usize> {
        let Identity::Guest { local_id } = &self.state.identity else {
            return Err(Error::InvalidState(format!(
                "only a guest session can be upgraded (currently {})",
                self.status()
            )));
        };

        let pending = PendingMigration {
            guest_id: local_id.clone(),
            tasks: self.store.tasks(),
            created_at: Utc::now(),
        };
        let count = pending.tasks.len();

        self.store.unbind();
        self.state.identity = Identity::None;
        self.state.pending_migration = Some(pending);
        self.save()?;

        info!("Upgrade started, {} guest tasks pending", count);
        Ok(count)
    }

    /// Accept a credential from the identity provider. Any pending guest
    /// tasks are copied into the account afterwards; a failed copy does not
    /// undo the sign-in.
    pub async fn sign_in(&mut self, credential: &str) -> Result<SignInOutcome> {
        self.require(SessionStatus::Unauthenticated, "sign in")?;

        let claims = Claims::decode(credential)?;
        let profile = claims.profile();
        let identity = Identity::Authenticated {
            user_id: claims.sub.clone(),
            profile: profile.clone(),
        };

        if let Some(scope) = identity.scope() {
            self.store.bind(scope).await?;
        }
        self.state.identity = identity;
        self.save()?;
        info!("Signed in as {}", profile.name);

        let migration = if self.state.pending_migration.is_some() {
            match self.migrate().await {
                Ok(copied) => MigrationOutcome::Completed { copied },
                Err(e) => {
                    warn!("Guest task migration failed: {}", e);
                    MigrationOutcome::Failed(e)
                }
            }
        } else {
            MigrationOutcome::NotNeeded
        };

        Ok(SignInOutcome { profile, migration })
    }

    /// Copy whatever is still pending. Returns the number of tasks copied.
    pub async fn retry_migration(&mut self) -> Result<usize> {
        self.require(SessionStatus::Authenticated, "migrate guest tasks")?;
        if self.state.pending_migration.is_none() {
            return Ok(0);
        }
        self.migrate().await
    }

    /// Return to the unauthenticated state. A guest's own data goes with
    /// the guest session. Any pending migration record is dropped, but the
    /// guest tasks it points at are left on disk.
    pub async fn sign_out(&mut self) -> Result<()> {
        let previous = std::mem::take(&mut self.state.identity);
        self.store.unbind();

        if let Identity::Guest { local_id } = &previous {
            let scope = Scope::Guest(local_id.clone());
            if let Err(e) = self.store.clear_scope(&scope).await {
                warn!("Failed to clear {} on sign-out: {}", scope, e);
            }
        }
        if let Some(pending) = self.state.pending_migration.take() {
            info!(
                "Discarded pending migration of {} tasks from {}",
                pending.tasks.len(),
                pending.guest_scope()
            );
        }

        self.save()?;
        info!("Signed out ({})", previous.status());
        Ok(())
    }

    async fn migrate(&mut self) -> Result<usize> {
        let Some(pending) = self.state.pending_migration.clone() else {
            return Ok(0);
        };
        let total = pending.tasks.len();

        for (copied, task) in pending.tasks.iter().enumerate() {
            if let Err(source) = self.store.create(&task.text, task.priority).await {
                self.state.pending_migration = Some(PendingMigration {
                    guest_id: pending.guest_id.clone(),
                    tasks: pending.tasks[copied..].to_vec(),
                    created_at: pending.created_at,
                });
                if let Err(e) = self.save() {
                    warn!("Failed to record remaining migration: {}", e);
                }
                return Err(Error::Migration {
                    copied,
                    total,
                    source: Box::new(source),
                });
            }
        }

        // Guest data goes only after every task is safely in the account.
        if let Err(e) = self.store.clear_scope(&pending.guest_scope()).await {
            warn!("Migrated tasks but could not clear guest data: {}", e);
        }
        self.state.pending_migration = None;
        self.save()?;

        info!("Migrated {} guest tasks", total);
        Ok(total)
    }

    fn require(&self, expected: SessionStatus, action: &str) -> Result<()> {
        let current = self.status();
        if current != expected {
            return Err(Error::InvalidState(format!(
                "cannot {action} while {current}"
            )));
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.state.save(&self.state_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::credential::tests::token;
    use crate::storage::store::tests::FlakyBackend;
    use crate::storage::{Backends, LocalBackend, RemoteBackend, TaskBackend};
    use crate::task::{Level, Priority, TaskId};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        temp: TempDir,
        local: Arc<dyn TaskBackend>,
        remote: Arc<FlakyBackend>,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let local: Arc<dyn TaskBackend> =
                Arc::new(LocalBackend::new(temp.path().join("guest")));
            let remote = Arc::new(FlakyBackend::new(Arc::new(
                RemoteBackend::open_in_memory().unwrap(),
            )));
            Self {
                temp,
                local,
                remote,
            }
        }

        fn store(&self) -> TaskStore {
            let remote: Arc<dyn TaskBackend> = self.remote.clone();
            TaskStore::new(Backends::new(Arc::clone(&self.local), remote))
        }

        fn session_path(&self) -> PathBuf {
            self.temp.path().join("session.json")
        }

        async fn manager(&self) -> SessionManager {
            SessionManager::restore(self.store(), self.session_path())
                .await
                .unwrap()
        }
    }

    fn credential(sub: &str) -> String {
        token(serde_json::json!({
            "sub": sub,
            "name": "Ada Lovelace",
            "email": "ada@example.com"
        }))
    }

    fn guest_scope(manager: &SessionManager) -> Scope {
        manager.identity().scope().unwrap()
    }

    #[tokio::test]
    async fn test_fresh_session_is_unauthenticated() {
        let harness = Harness::new();
        let manager = harness.manager().await;
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
        assert!(!manager.store().is_bound());
    }

    #[tokio::test]
    async fn test_guest_session_binds_local_scope() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();

        assert_eq!(manager.status(), SessionStatus::Guest);
        assert!(guest_scope(&manager).is_guest());
        manager
            .store()
            .create("Water plants", Priority::default())
            .await
            .unwrap();
        assert_eq!(manager.store().tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_guest_cannot_sign_in_without_upgrade() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();

        let err = manager.sign_in(&credential("u1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(manager.status(), SessionStatus::Guest);
    }

    #[tokio::test]
    async fn test_restore_resumes_guest() {
        let harness = Harness::new();
        let scope = {
            let mut manager = harness.manager().await;
            manager.continue_as_guest().await.unwrap();
            manager
                .store()
                .create("Persisted", Priority::default())
                .await
                .unwrap();
            guest_scope(&manager)
        };

        let manager = harness.manager().await;
        assert_eq!(manager.store().scope(), Some(&scope));
        assert_eq!(manager.store().tasks()[0].text, "Persisted");
    }

    #[tokio::test]
    async fn test_sign_in_without_pending_tasks() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;

        let outcome = manager.sign_in(&credential("u1")).await.unwrap();
        assert_eq!(outcome.profile.name, "Ada Lovelace");
        assert!(matches!(outcome.migration, MigrationOutcome::NotNeeded));
        assert_eq!(manager.store().scope(), Some(&Scope::User("u1".into())));
    }

    #[tokio::test]
    async fn test_bad_credential_stays_unauthenticated() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;

        let err = manager.sign_in("garbage").await.unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
        assert!(!manager.store().is_bound());
    }

    #[tokio::test]
    async fn test_upgrade_migrates_every_guest_task() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        let guest = guest_scope(&manager);

        let store = manager.store();
        store.create("low", Priority::default()).await.unwrap();
        store
            .create("high", Priority::uniform(Level::High))
            .await
            .unwrap();
        store
            .create("medium", Priority::uniform(Level::Medium))
            .await
            .unwrap();

        let guest_ids: Vec<TaskId> = store.tasks().into_iter().map(|task| task.id).collect();

        assert_eq!(manager.begin_upgrade().await.unwrap(), 3);
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
        assert!(!manager.store().is_bound());

        let outcome = manager.sign_in(&credential("u1")).await.unwrap();
        assert!(matches!(
            outcome.migration,
            MigrationOutcome::Completed { copied: 3 }
        ));

        let mut migrated: Vec<(String, u8)> = manager
            .store()
            .tasks()
            .iter()
            .map(|task| (task.text.clone(), task.total_score()))
            .collect();
        migrated.sort();
        assert_eq!(
            migrated,
            vec![
                ("high".to_string(), 45),
                ("low".to_string(), 15),
                ("medium".to_string(), 30),
            ]
        );
        for task in manager.store().tasks() {
            assert!(!guest_ids.contains(&task.id), "id {} was reused", task.id);
        }

        assert!(manager.pending_migration().is_none());
        assert!(harness.local.load(&guest).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_with_no_tasks_leaves_account_untouched() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.sign_in(&credential("u1")).await.unwrap();
        manager
            .store()
            .create("already here", Priority::uniform(Level::Medium))
            .await
            .unwrap();
        let before = manager.store().tasks();
        manager.sign_out().await.unwrap();

        manager.continue_as_guest().await.unwrap();
        assert_eq!(manager.begin_upgrade().await.unwrap(), 0);
        let outcome = manager.sign_in(&credential("u1")).await.unwrap();
        assert!(matches!(
            outcome.migration,
            MigrationOutcome::Completed { copied: 0 }
        ));
        assert_eq!(manager.store().tasks(), before);
        assert!(manager.pending_migration().is_none());
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_pending_and_guest_data() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        let guest = guest_scope(&manager);
        manager
            .store()
            .create("one", Priority::default())
            .await
            .unwrap();
        manager
            .store()
            .create("two", Priority::default())
            .await
            .unwrap();
        manager.begin_upgrade().await.unwrap();

        harness.remote.fail_writes.store(true, Ordering::SeqCst);
        let outcome = manager.sign_in(&credential("u1")).await.unwrap();
        match outcome.migration {
            MigrationOutcome::Failed(Error::Migration { copied, total, .. }) => {
                assert_eq!((copied, total), (0, 2));
            }
            other => panic!("unexpected migration outcome {other:?}"),
        }

        assert_eq!(manager.status(), SessionStatus::Authenticated);
        assert_eq!(manager.pending_migration().unwrap().tasks.len(), 2);
        assert_eq!(harness.local.load(&guest).unwrap().len(), 2);

        // The pending record survives a restart.
        let saved = SessionState::load(&harness.session_path()).unwrap();
        assert_eq!(saved.pending_migration.unwrap().tasks.len(), 2);

        harness.remote.recover();
        assert_eq!(manager.retry_migration().await.unwrap(), 2);
        assert_eq!(manager.store().tasks().len(), 2);
        assert!(manager.pending_migration().is_none());
        assert!(harness.local.load(&guest).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_migration_retries_only_the_rest() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        for text in ["first", "second", "third"] {
            manager
                .store()
                .create(text, Priority::default())
                .await
                .unwrap();
        }
        manager.begin_upgrade().await.unwrap();

        harness.remote.fail_after(1);
        let outcome = manager.sign_in(&credential("u1")).await.unwrap();
        match outcome.migration {
            MigrationOutcome::Failed(Error::Migration { copied, total, .. }) => {
                assert_eq!((copied, total), (1, 3));
            }
            other => panic!("unexpected migration outcome {other:?}"),
        }
        assert_eq!(manager.store().tasks().len(), 1);
        assert_eq!(manager.pending_migration().unwrap().tasks.len(), 2);

        harness.remote.recover();
        assert_eq!(manager.retry_migration().await.unwrap(), 2);

        let mut texts: Vec<String> = manager
            .store()
            .tasks()
            .into_iter()
            .map(|task| task.text)
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(manager.pending_migration().is_none());
    }

    #[tokio::test]
    async fn test_account_sign_out_keeps_guest_tasks_of_failed_migration() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        let guest = guest_scope(&manager);
        manager
            .store()
            .create("precious", Priority::default())
            .await
            .unwrap();
        manager.begin_upgrade().await.unwrap();

        harness.remote.fail_writes.store(true, Ordering::SeqCst);
        let outcome = manager.sign_in(&credential("u1")).await.unwrap();
        assert!(matches!(outcome.migration, MigrationOutcome::Failed(_)));

        manager.sign_out().await.unwrap();
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
        assert!(manager.pending_migration().is_none());
        let kept = harness.local.load(&guest).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "precious");
    }

    #[tokio::test]
    async fn test_retry_without_pending_is_noop() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.sign_in(&credential("u1")).await.unwrap();
        assert_eq!(manager.retry_migration().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_guest_after_abandoned_upgrade_resumes_same_guest() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        let guest = guest_scope(&manager);
        manager
            .store()
            .create("keep me", Priority::default())
            .await
            .unwrap();
        manager.begin_upgrade().await.unwrap();

        manager.continue_as_guest().await.unwrap();
        assert_eq!(guest_scope(&manager), guest);
        assert_eq!(manager.store().tasks().len(), 1);
        assert!(manager.pending_migration().is_none());
    }

    #[tokio::test]
    async fn test_guest_sign_out_clears_guest_tasks() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        let guest = guest_scope(&manager);
        manager
            .store()
            .create("ephemeral", Priority::default())
            .await
            .unwrap();

        manager.sign_out().await.unwrap();
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
        assert!(manager.store().tasks().is_empty());
        assert!(harness.local.load(&guest).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_drops_pending_record_but_not_guest_tasks() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.continue_as_guest().await.unwrap();
        let guest = guest_scope(&manager);
        manager
            .store()
            .create("parked", Priority::default())
            .await
            .unwrap();
        manager.begin_upgrade().await.unwrap();

        manager.sign_out().await.unwrap();
        assert!(manager.pending_migration().is_none());
        assert_eq!(harness.local.load(&guest).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_account_sign_out_keeps_account_tasks() {
        let harness = Harness::new();
        let mut manager = harness.manager().await;
        manager.sign_in(&credential("u1")).await.unwrap();
        manager
            .store()
            .create("durable", Priority::default())
            .await
            .unwrap();

        manager.sign_out().await.unwrap();
        assert!(!manager.store().is_bound());

        manager.sign_in(&credential("u1")).await.unwrap();
        assert_eq!(manager.store().tasks()[0].text, "durable");
    }
}
