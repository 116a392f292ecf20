//! Domain service
//!
//! The one entry point front ends use. Loads go through the entity store's
//! liveness tickets; mutations run the association rules first, then issue
//! exactly one backend write, then invalidate whatever the write made stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::Backend;
use crate::error::{BackendError, DomainError, Result};
use crate::models::{
    AuthResponse, Build, BuildDraft, Credentials, DeploymentDraft, DeploymentUpdate, Environment,
    EnvironmentDraft, EnvironmentGroup, EnvironmentGroupDraft, EnvironmentSystem,
    EnvironmentSystems, Release, ReleaseDraft, System, SystemDraft, User,
};
use crate::rules::{self, VersionDrift};
use crate::store::{self, Collection, EntityKind, EntityStore};

/// Held while a mutation is outstanding
struct MutationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct DomainService<B: Backend + ?Sized = dyn Backend> {
    backend: Arc<B>,
    store: Mutex<EntityStore>,
    mutating: AtomicBool,
}

impl<B: Backend + ?Sized> DomainService<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            store: Mutex::new(EntityStore::new()),
            mutating: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn store(&self) -> MutexGuard<'_, EntityStore> {
        store::lock(&self.store)
    }

    /// Last collection of `kind` that was loaded and not invalidated since
    pub fn cached(&self, kind: EntityKind) -> Option<Collection> {
        self.store().get(kind).cloned()
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating.load(Ordering::SeqCst)
    }

    fn begin_mutation(&self, operation: &str) -> Result<MutationGuard<'_>> {
        self.mutating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DomainError::Busy(operation.to_string()))?;
        Ok(MutationGuard {
            flag: &self.mutating,
        })
    }

    fn invalidate(&self, kinds: &[EntityKind]) {
        let mut store = self.store();
        for kind in kinds {
            store.invalidate(*kind);
        }
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Fetches one collection in full through the store
    pub fn load(&self, kind: EntityKind) -> Result<Collection> {
        store::load(&self.store, &*self.backend, kind)
            .map_err(|e| fail(&format!("Failed to load {}", kind), e))
    }

    pub fn releases(&self) -> Result<Vec<Release>> {
        Ok(self.load(EntityKind::Releases)?.into_releases())
    }

    pub fn builds(&self) -> Result<Vec<Build>> {
        Ok(self.load(EntityKind::Builds)?.into_builds())
    }

    pub fn systems(&self) -> Result<Vec<System>> {
        Ok(self.load(EntityKind::Systems)?.into_systems())
    }

    pub fn environments(&self) -> Result<Vec<Environment>> {
        Ok(self.load(EntityKind::Environments)?.into_environments())
    }

    pub fn environment_groups(&self) -> Result<Vec<EnvironmentGroup>> {
        Ok(self.load(EntityKind::EnvironmentGroups)?.into_environment_groups())
    }

    pub fn release(&self, id: &str) -> Result<Release> {
        self.backend
            .get_release(id)
            .map_err(|e| fail("Failed to load release", e))
    }

    pub fn build(&self, id: &str) -> Result<Build> {
        self.backend
            .get_build(id)
            .map_err(|e| fail("Failed to load build", e))
    }

    pub fn system(&self, id: &str) -> Result<System> {
        self.backend
            .get_system(id)
            .map_err(|e| fail("Failed to load system", e))
    }

    pub fn environment(&self, id: &str) -> Result<Environment> {
        self.backend
            .get_environment(id)
            .map_err(|e| fail("Failed to load environment", e))
    }

    pub fn environment_group(&self, id: &str) -> Result<EnvironmentGroup> {
        self.backend
            .get_environment_group(id)
            .map_err(|e| fail("Failed to load environment group", e))
    }

    pub fn release_builds(&self, release_id: &str) -> Result<Vec<Build>> {
        self.backend
            .release_builds(release_id)
            .map_err(|e| fail("Failed to load release builds", e))
    }

    pub fn subsystems(&self, system_id: &str) -> Result<Vec<System>> {
        self.backend
            .subsystems(system_id)
            .map_err(|e| fail("Failed to load subsystems", e))
    }

    /// Every build of one system, whatever release it belongs to
    pub fn system_builds(&self, system_id: &str) -> Result<Vec<Build>> {
        Ok(self
            .builds()?
            .into_iter()
            .filter(|b| b.system_id == system_id)
            .collect())
    }

    pub fn environment_systems(&self, environment_id: &str) -> Result<EnvironmentSystems> {
        self.backend
            .environment_systems(environment_id)
            .map_err(|e| fail("Failed to load environment systems", e))
    }

    /// Deployed systems whose version differs from their release's build
    pub fn environment_drift(&self, environment_id: &str) -> Result<Vec<VersionDrift>> {
        let environment = self.environment(environment_id)?;
        let deployed = self.environment_systems(environment_id)?;
        let release_builds = self.release_builds(&environment.release_id)?;
        Ok(rules::version_drift(&deployed.systems, &release_builds))
    }

    /// Builds that could be attached to `release_id`
    ///
    /// Unassociated builds, plus builds that already name this release but
    /// are missing from its build list.
    pub fn unassociated_builds(&self, release_id: &str) -> Result<Vec<Build>> {
        let in_release = self.release_builds(release_id)?;
        Ok(self
            .builds()?
            .into_iter()
            .filter(|b| b.release_id.as_deref().map_or(true, |r| r == release_id))
            .filter(|b| !in_release.iter().any(|rb| rb.id == b.id))
            .collect())
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub fn current_user(&self) -> Result<User> {
        self.backend
            .me()
            .map_err(|e| fail("Failed to validate session", e))
    }

    pub fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let response = self
            .backend
            .login(credentials)
            .map_err(|e| credential_failure("Login failed", e))?;
        self.store().invalidate_all();
        log::info!("logged in as {}", response.user.email);
        Ok(response)
    }

    pub fn register(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let response = self
            .backend
            .register(credentials)
            .map_err(|e| credential_failure("Registration failed", e))?;
        self.store().invalidate_all();
        log::info!("registered {}", response.user.email);
        Ok(response)
    }

    // =========================================================================
    // Releases
    // =========================================================================

    pub fn create_release(&self, draft: &ReleaseDraft) -> Result<Release> {
        rules::validate_release_draft(draft)?;
        let _guard = self.begin_mutation("create release")?;
        let release = self
            .backend
            .create_release(draft)
            .map_err(|e| fail("Failed to save release", e))?;
        self.invalidate(&[EntityKind::Releases]);
        log::info!("created release {} ({})", release.name, release.id);
        Ok(release)
    }

    pub fn update_release(&self, id: &str, draft: &ReleaseDraft) -> Result<Release> {
        rules::validate_release_draft(draft)?;
        let _guard = self.begin_mutation("update release")?;
        let release = self
            .backend
            .update_release(id, draft)
            .map_err(|e| fail("Failed to save release", e))?;
        self.invalidate(&[EntityKind::Releases, EntityKind::Builds]);
        log::info!("updated release {} ({})", release.name, release.id);
        Ok(release)
    }

    pub fn delete_release(&self, id: &str) -> Result<()> {
        let _guard = self.begin_mutation("delete release")?;
        self.backend
            .delete_release(id)
            .map_err(|e| fail("Failed to delete release", e))?;
        self.invalidate(&[
            EntityKind::Releases,
            EntityKind::Builds,
            EntityKind::Environments,
        ]);
        log::info!("deleted release {}", id);
        Ok(())
    }

    // =========================================================================
    // Builds
    // =========================================================================

    /// Fresh check that `release_id` has no other build for the system
    fn ensure_release_slot(
        &self,
        build_id: Option<&str>,
        system_id: &str,
        release_id: &str,
        context: &str,
    ) -> Result<()> {
        let release_builds = self
            .backend
            .release_builds(release_id)
            .map_err(|e| fail(context, e))?;
        let systems = self.backend.list_systems().map_err(|e| fail(context, e))?;
        rules::check_release_slot(build_id, system_id, release_id, &release_builds, &systems)?;
        Ok(())
    }

    pub fn create_build(&self, draft: &BuildDraft) -> Result<Build> {
        const CONTEXT: &str = "Failed to save build";
        rules::validate_build_draft(draft)?;
        let _guard = self.begin_mutation("create build")?;
        if let Some(release_id) = draft.release_id.as_deref() {
            self.ensure_release_slot(None, &draft.system_id, release_id, CONTEXT)?;
        }
        let build = self
            .backend
            .create_build(draft)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Builds, EntityKind::Releases]);
        log::info!("created build {} ({})", build.version, build.id);
        Ok(build)
    }

    /// Replaces a build; its system cannot change
    pub fn update_build(&self, id: &str, draft: &BuildDraft) -> Result<Build> {
        const CONTEXT: &str = "Failed to save build";
        rules::validate_build_draft(draft)?;
        let _guard = self.begin_mutation("update build")?;
        let existing = self.backend.get_build(id).map_err(|e| fail(CONTEXT, e))?;
        rules::check_system_immutable(&existing, draft)?;
        // Only a move into another release can take a slot
        if let Some(release_id) = draft.release_id.as_deref() {
            if existing.release_id.as_deref() != Some(release_id) {
                self.ensure_release_slot(Some(id), &draft.system_id, release_id, CONTEXT)?;
            }
        }
        let build = self
            .backend
            .update_build(id, draft)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Builds, EntityKind::Releases]);
        log::info!("updated build {} ({})", build.version, build.id);
        Ok(build)
    }

    pub fn delete_build(&self, id: &str) -> Result<()> {
        let _guard = self.begin_mutation("delete build")?;
        self.backend
            .delete_build(id)
            .map_err(|e| fail("Failed to delete build", e))?;
        self.invalidate(&[EntityKind::Builds, EntityKind::Releases]);
        log::info!("deleted build {}", id);
        Ok(())
    }

    /// Places a build in a release, enforcing one build per system
    ///
    /// Works from a fresh fetch of the build, the release's current builds
    /// and the system list, then sends the full build record.
    pub fn attach_build_to_release(&self, build_id: &str, release_id: &str) -> Result<Build> {
        const CONTEXT: &str = "Failed to add build to release";
        let _guard = self.begin_mutation("add build to release")?;

        let build = self
            .backend
            .get_build(build_id)
            .map_err(|e| fail(CONTEXT, e))?;
        let release_builds = self
            .backend
            .release_builds(release_id)
            .map_err(|e| fail(CONTEXT, e))?;
        let systems = self.backend.list_systems().map_err(|e| fail(CONTEXT, e))?;

        rules::check_attach(&build, release_id, &release_builds, &systems)?;
        let record = rules::attach_record(&build, release_id)?;

        let updated = self
            .backend
            .update_build(&build.id, &record)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Builds, EntityKind::Releases]);
        log::info!("added build {} to release {}", updated.id, release_id);
        Ok(updated)
    }

    pub fn detach_build_from_release(&self, build_id: &str) -> Result<Build> {
        const CONTEXT: &str = "Failed to remove build from release";
        let _guard = self.begin_mutation("remove build from release")?;

        let build = self
            .backend
            .get_build(build_id)
            .map_err(|e| fail(CONTEXT, e))?;
        let record = rules::detach_record(&build)?;

        let updated = self
            .backend
            .update_build(&build.id, &record)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Builds, EntityKind::Releases]);
        log::info!(
            "removed build {} from release {}",
            updated.id,
            build.release_id.as_deref().unwrap_or("-")
        );
        Ok(updated)
    }

    // =========================================================================
    // Systems
    // =========================================================================

    pub fn create_system(&self, draft: &SystemDraft) -> Result<System> {
        const CONTEXT: &str = "Failed to save system";
        let _guard = self.begin_mutation("create system")?;
        let all = self.backend.list_systems().map_err(|e| fail(CONTEXT, e))?;
        let draft = rules::validate_system_draft(draft, &all, None)?;
        let system = self
            .backend
            .create_system(&draft)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Systems]);
        log::info!("created {} {} ({})", system.system_type, system.name, system.id);
        Ok(system)
    }

    pub fn update_system(&self, id: &str, draft: &SystemDraft) -> Result<System> {
        const CONTEXT: &str = "Failed to save system";
        let _guard = self.begin_mutation("update system")?;
        let all = self.backend.list_systems().map_err(|e| fail(CONTEXT, e))?;
        let draft = rules::validate_system_draft(draft, &all, Some(id))?;
        let system = self
            .backend
            .update_system(id, &draft)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Systems, EntityKind::Builds]);
        log::info!("updated {} {} ({})", system.system_type, system.name, system.id);
        Ok(system)
    }

    /// Deletes a system that has no subsystems
    ///
    /// The children check runs against a fresh system list, not the cache.
    pub fn delete_system(&self, id: &str) -> Result<()> {
        const CONTEXT: &str = "Failed to delete system";
        let _guard = self.begin_mutation("delete system")?;
        let all = self.backend.list_systems().map_err(|e| fail(CONTEXT, e))?;
        let system = match all.iter().find(|s| s.id == id) {
            Some(system) => system.clone(),
            None => self.backend.get_system(id).map_err(|e| fail(CONTEXT, e))?,
        };
        rules::check_delete_system(&system, &all)?;

        self.backend
            .delete_system(id)
            .map_err(|e| fail(CONTEXT, e))?;
        self.invalidate(&[EntityKind::Systems]);
        log::info!("deleted system {} ({})", system.name, id);
        Ok(())
    }

    // =========================================================================
    // Environments
    // =========================================================================

    pub fn create_environment(&self, draft: &EnvironmentDraft) -> Result<Environment> {
        rules::validate_environment_draft(draft)?;
        let _guard = self.begin_mutation("create environment")?;
        let environment = self
            .backend
            .create_environment(draft)
            .map_err(|e| fail("Failed to save environment", e))?;
        self.invalidate(&[EntityKind::Environments]);
        log::info!("created environment {} ({})", environment.name, environment.id);
        Ok(environment)
    }

    pub fn update_environment(&self, id: &str, draft: &EnvironmentDraft) -> Result<Environment> {
        rules::validate_environment_draft(draft)?;
        let _guard = self.begin_mutation("update environment")?;
        let environment = self
            .backend
            .update_environment(id, draft)
            .map_err(|e| fail("Failed to save environment", e))?;
        self.invalidate(&[EntityKind::Environments]);
        log::info!("updated environment {} ({})", environment.name, environment.id);
        Ok(environment)
    }

    pub fn delete_environment(&self, id: &str) -> Result<()> {
        let _guard = self.begin_mutation("delete environment")?;
        self.backend
            .delete_environment(id)
            .map_err(|e| fail("Failed to delete environment", e))?;
        self.invalidate(&[EntityKind::Environments]);
        log::info!("deleted environment {}", id);
        Ok(())
    }

    // =========================================================================
    // Environment groups
    // =========================================================================

    pub fn create_environment_group(&self, draft: &EnvironmentGroupDraft) -> Result<EnvironmentGroup> {
        rules::validate_environment_group_draft(draft)?;
        let _guard = self.begin_mutation("create environment group")?;
        let group = self
            .backend
            .create_environment_group(draft)
            .map_err(|e| fail("Failed to save environment group", e))?;
        self.invalidate(&[EntityKind::EnvironmentGroups]);
        log::info!("created environment group {} ({})", group.name, group.id);
        Ok(group)
    }

    pub fn update_environment_group(
        &self,
        id: &str,
        draft: &EnvironmentGroupDraft,
    ) -> Result<EnvironmentGroup> {
        rules::validate_environment_group_draft(draft)?;
        let _guard = self.begin_mutation("update environment group")?;
        let group = self
            .backend
            .update_environment_group(id, draft)
            .map_err(|e| fail("Failed to save environment group", e))?;
        self.invalidate(&[EntityKind::EnvironmentGroups]);
        log::info!("updated environment group {} ({})", group.name, group.id);
        Ok(group)
    }

    /// Deletes a group no environment belongs to; the backend enforces that
    pub fn delete_environment_group(&self, id: &str) -> Result<()> {
        let _guard = self.begin_mutation("delete environment group")?;
        self.backend
            .delete_environment_group(id)
            .map_err(|e| fail("Failed to delete environment group", e))?;
        self.invalidate(&[EntityKind::EnvironmentGroups]);
        log::info!("deleted environment group {}", id);
        Ok(())
    }

    // =========================================================================
    // Deployed systems
    // =========================================================================

    /// Rejects an explicit version no build of the target systems carries
    fn ensure_versions_exist(&self, system_id: &str, version: &str, context: &str) -> Result<()> {
        let systems = self.backend.list_systems().map_err(|e| fail(context, e))?;
        let builds = self.backend.list_builds().map_err(|e| fail(context, e))?;
        let system = match systems.iter().find(|s| s.id == system_id) {
            Some(system) => system.clone(),
            None => self.backend.get_system(system_id).map_err(|e| fail(context, e))?,
        };
        for target in rules::deployment_targets(&system, &systems) {
            rules::check_version_available(target, version, &builds)?;
        }
        Ok(())
    }

    /// Deploys a system, or all subsystems of a parent, into an environment
    ///
    /// Returns the systems actually added.
    pub fn add_system_to_environment(
        &self,
        environment_id: &str,
        draft: &DeploymentDraft,
    ) -> Result<Vec<EnvironmentSystem>> {
        const CONTEXT: &str = "Failed to add system to environment";
        rules::validate_deployment_draft(draft)?;
        let _guard = self.begin_mutation("add system to environment")?;
        if let Some(version) = draft.version.as_deref().filter(|v| !v.is_empty()) {
            self.ensure_versions_exist(&draft.system_id, version, CONTEXT)?;
        }
        let added = self
            .backend
            .add_system_to_environment(environment_id, draft)
            .map_err(|e| fail(CONTEXT, e))?;
        log::info!(
            "added {} system(s) to environment {}",
            added.len(),
            environment_id
        );
        Ok(added)
    }

    pub fn update_environment_system(
        &self,
        environment_id: &str,
        system_id: &str,
        update: &DeploymentUpdate,
    ) -> Result<()> {
        const CONTEXT: &str = "Failed to update environment system";
        let _guard = self.begin_mutation("update environment system")?;
        if let Some(version) = update.version.as_deref().filter(|v| !v.is_empty()) {
            self.ensure_versions_exist(system_id, version, CONTEXT)?;
        }
        self.backend
            .update_environment_system(environment_id, system_id, update)
            .map_err(|e| fail(CONTEXT, e))?;
        log::info!("updated system {} in environment {}", system_id, environment_id);
        Ok(())
    }

    pub fn remove_system_from_environment(&self, environment_id: &str, system_id: &str) -> Result<()> {
        let _guard = self.begin_mutation("remove system from environment")?;
        self.backend
            .remove_system_from_environment(environment_id, system_id)
            .map_err(|e| fail("Failed to remove system from environment", e))?;
        log::info!("removed system {} from environment {}", system_id, environment_id);
        Ok(())
    }

    /// Resets deployed versions to the release's builds; returns the change count
    pub fn sync_environment_systems(&self, environment_id: &str) -> Result<usize> {
        let _guard = self.begin_mutation("sync environment versions")?;
        let updated = self
            .backend
            .sync_environment_systems(environment_id)
            .map_err(|e| fail("Failed to sync environment versions", e))?;
        log::info!(
            "synced environment {}: {} version(s) changed",
            environment_id,
            updated
        );
        Ok(updated)
    }
}

fn fail(context: &str, err: BackendError) -> DomainError {
    let err = DomainError::from_backend(context, err);
    match &err {
        DomainError::Auth(message) => log::warn!("session rejected: {}", message),
        DomainError::ServerRejection { status, .. } => log::warn!("{} (HTTP {})", err, status),
        _ => log::warn!("{}", err),
    }
    err
}

// A 401 from login or register means bad credentials, not an expired session.
fn credential_failure(context: &str, err: BackendError) -> DomainError {
    match err {
        BackendError::Unauthorized(message) => DomainError::ServerRejection {
            context: context.to_string(),
            status: 401,
            message,
        },
        other => fail(context, other),
    }
}
