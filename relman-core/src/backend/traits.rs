//! Backend collaborator trait
//!
//! One method per REST operation the domain layer consumes.

use crate::error::BackendError;
use crate::models::{
    AuthResponse, Build, BuildDraft, Credentials, DeploymentDraft, DeploymentUpdate, Environment,
    EnvironmentDraft, EnvironmentGroup, EnvironmentGroupDraft, EnvironmentSystem,
    EnvironmentSystems, Release, ReleaseDraft, System, SystemDraft, User,
};

pub type Result<T> = std::result::Result<T, BackendError>;

/// Types of backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Remote REST API over HTTP
    Http,
    /// In-process store, optionally persisted to a YAML snapshot
    Local,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Http => write!(f, "HTTP"),
            BackendType::Local => write!(f, "Local"),
        }
    }
}

/// Source of truth for releases, builds, systems and environments
///
/// Every mutation is a single request. The backend decides whether it is
/// accepted; callers treat a rejection as authoritative even when their own
/// checks passed, since their view may be stale.
///
/// `release_builds` and `subsystems` have default implementations that
/// filter the full collections; backends with dedicated endpoints override
/// them.
pub trait Backend: Send + Sync {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Base URL or file path, for display
    fn location(&self) -> String;

    // =========================================================================
    // Releases
    // =========================================================================

    fn list_releases(&self) -> Result<Vec<Release>>;

    fn get_release(&self, id: &str) -> Result<Release>;

    fn create_release(&self, draft: &ReleaseDraft) -> Result<Release>;

    fn update_release(&self, id: &str, draft: &ReleaseDraft) -> Result<Release>;

    fn delete_release(&self, id: &str) -> Result<()>;

    /// Builds currently associated with a release
    fn release_builds(&self, id: &str) -> Result<Vec<Build>> {
        self.get_release(id)?;
        Ok(self
            .list_builds()?
            .into_iter()
            .filter(|b| b.release_id.as_deref() == Some(id))
            .collect())
    }

    // =========================================================================
    // Builds
    // =========================================================================

    fn list_builds(&self) -> Result<Vec<Build>>;

    fn get_build(&self, id: &str) -> Result<Build>;

    fn create_build(&self, draft: &BuildDraft) -> Result<Build>;

    /// Replaces the build with the full record in `draft`
    fn update_build(&self, id: &str, draft: &BuildDraft) -> Result<Build>;

    fn delete_build(&self, id: &str) -> Result<()>;

    // =========================================================================
    // Systems
    // =========================================================================

    fn list_systems(&self) -> Result<Vec<System>>;

    fn get_system(&self, id: &str) -> Result<System>;

    fn create_system(&self, draft: &SystemDraft) -> Result<System>;

    fn update_system(&self, id: &str, draft: &SystemDraft) -> Result<System>;

    fn delete_system(&self, id: &str) -> Result<()>;

    fn subsystems(&self, id: &str) -> Result<Vec<System>> {
        Ok(self
            .list_systems()?
            .into_iter()
            .filter(|s| s.parent_id.as_deref() == Some(id))
            .collect())
    }

    // =========================================================================
    // Environments
    // =========================================================================

    fn list_environments(&self) -> Result<Vec<Environment>>;

    fn get_environment(&self, id: &str) -> Result<Environment>;

    fn create_environment(&self, draft: &EnvironmentDraft) -> Result<Environment>;

    fn update_environment(&self, id: &str, draft: &EnvironmentDraft) -> Result<Environment>;

    fn delete_environment(&self, id: &str) -> Result<()>;

    // =========================================================================
    // Environment groups
    // =========================================================================

    fn list_environment_groups(&self) -> Result<Vec<EnvironmentGroup>>;

    fn get_environment_group(&self, id: &str) -> Result<EnvironmentGroup>;

    fn create_environment_group(&self, draft: &EnvironmentGroupDraft) -> Result<EnvironmentGroup>;

    fn update_environment_group(
        &self,
        id: &str,
        draft: &EnvironmentGroupDraft,
    ) -> Result<EnvironmentGroup>;

    /// Rejected while any environment still belongs to the group
    fn delete_environment_group(&self, id: &str) -> Result<()>;

    // =========================================================================
    // Deployed systems
    // =========================================================================

    fn environment_systems(&self, environment_id: &str) -> Result<EnvironmentSystems>;

    /// Deploys a system, or every subsystem of a parent system
    ///
    /// Returns the systems that were added; ones already deployed are
    /// skipped.
    fn add_system_to_environment(
        &self,
        environment_id: &str,
        draft: &DeploymentDraft,
    ) -> Result<Vec<EnvironmentSystem>>;

    fn update_environment_system(
        &self,
        environment_id: &str,
        system_id: &str,
        update: &DeploymentUpdate,
    ) -> Result<()>;

    fn remove_system_from_environment(&self, environment_id: &str, system_id: &str)
        -> Result<()>;

    /// Resets every deployed version to the one the release ships
    ///
    /// Returns how many versions changed.
    fn sync_environment_systems(&self, environment_id: &str) -> Result<usize>;

    // =========================================================================
    // Session
    // =========================================================================

    /// Validates the current token and returns its user
    fn me(&self) -> Result<User>;

    fn login(&self, credentials: &Credentials) -> Result<AuthResponse>;

    fn register(&self, credentials: &Credentials) -> Result<AuthResponse>;
}
