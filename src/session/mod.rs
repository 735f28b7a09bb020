pub mod credential;
pub mod identity;
pub mod manager;

pub use credential::Claims;
pub use identity::{Identity, PendingMigration, Profile, SessionState, SessionStatus};
pub use manager::{MigrationOutcome, SessionManager, SignInOutcome};
