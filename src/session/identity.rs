use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::storage::Scope;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Who is using the app right now. At most one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Identity {
    #[default]
    None,
    #[serde(rename_all = "camelCase")]
    Guest { local_id: String },
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: String, profile: Profile },
}

impl Identity {
    pub fn new_guest() -> Self {
        Identity::Guest {
            local_id: format!("guest_{}", Uuid::new_v4().simple()),
        }
    }

    pub fn scope(&self) -> Option<Scope> {
        match self {
            Identity::None => None,
            Identity::Guest { local_id } => Some(Scope::Guest(local_id.clone())),
            Identity::Authenticated { user_id, .. } => Some(Scope::User(user_id.clone())),
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            Identity::None => SessionStatus::Unauthenticated,
            Identity::Guest { .. } => SessionStatus::Guest,
            Identity::Authenticated { .. } => SessionStatus::Authenticated,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Identity::None => "",
            Identity::Guest { .. } => "Guest User",
            Identity::Authenticated { profile, .. } => &profile.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Unauthenticated,
    Guest,
    Authenticated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Unauthenticated => write!(f, "signed out"),
            SessionStatus::Guest => write!(f, "guest"),
            SessionStatus::Authenticated => write!(f, "signed in"),
        }
    }
}

/// Guest tasks waiting to be copied into an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMigration {
    pub guest_id: String,
    pub tasks: Vec<Task>,
    pub created_at: DateTime<Utc>,
}

impl PendingMigration {
    pub fn guest_scope(&self) -> Scope {
        Scope::Guest(self.guest_id.clone())
    }
}

/// Everything about the session that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_migration: Option<PendingMigration>,
}

impl SessionState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let state: SessionState = serde_json::from_str(&content)?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
