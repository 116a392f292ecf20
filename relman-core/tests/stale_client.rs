//! A client whose view of a release is out of date passes its own checks;
//! the backend has the final word.

use std::sync::Arc;

use relman_core::backend::Result;
use relman_core::{
    parse_form_date, AuthResponse, Backend, BackendType, Build, BuildDraft, Credentials,
    DeploymentDraft, DeploymentUpdate, DomainError, DomainService, Environment, EnvironmentDraft,
    EnvironmentGroup, EnvironmentGroupDraft, EnvironmentSystem, EnvironmentSystems, LocalBackend,
    Release, ReleaseDraft, System, SystemDraft, SystemType, User,
};

/// Delegates to a shared backend but always reports releases as empty,
/// like a client that loaded before another client attached a build
struct StaleReleaseView {
    inner: Arc<LocalBackend>,
}

impl Backend for StaleReleaseView {
    fn backend_type(&self) -> BackendType {
        self.inner.backend_type()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    fn list_releases(&self) -> Result<Vec<Release>> {
        self.inner.list_releases()
    }

    fn get_release(&self, id: &str) -> Result<Release> {
        self.inner.get_release(id)
    }

    fn create_release(&self, draft: &ReleaseDraft) -> Result<Release> {
        self.inner.create_release(draft)
    }

    fn update_release(&self, id: &str, draft: &ReleaseDraft) -> Result<Release> {
        self.inner.update_release(id, draft)
    }

    fn delete_release(&self, id: &str) -> Result<()> {
        self.inner.delete_release(id)
    }

    fn release_builds(&self, _id: &str) -> Result<Vec<Build>> {
        Ok(Vec::new())
    }

    fn list_builds(&self) -> Result<Vec<Build>> {
        self.inner.list_builds()
    }

    fn get_build(&self, id: &str) -> Result<Build> {
        self.inner.get_build(id)
    }

    fn create_build(&self, draft: &BuildDraft) -> Result<Build> {
        self.inner.create_build(draft)
    }

    fn update_build(&self, id: &str, draft: &BuildDraft) -> Result<Build> {
        self.inner.update_build(id, draft)
    }

    fn delete_build(&self, id: &str) -> Result<()> {
        self.inner.delete_build(id)
    }

    fn list_systems(&self) -> Result<Vec<System>> {
        self.inner.list_systems()
    }

    fn get_system(&self, id: &str) -> Result<System> {
        self.inner.get_system(id)
    }

    fn create_system(&self, draft: &SystemDraft) -> Result<System> {
        self.inner.create_system(draft)
    }

    fn update_system(&self, id: &str, draft: &SystemDraft) -> Result<System> {
        self.inner.update_system(id, draft)
    }

    fn delete_system(&self, id: &str) -> Result<()> {
        self.inner.delete_system(id)
    }

    fn list_environments(&self) -> Result<Vec<Environment>> {
        self.inner.list_environments()
    }

    fn get_environment(&self, id: &str) -> Result<Environment> {
        self.inner.get_environment(id)
    }

    fn create_environment(&self, draft: &EnvironmentDraft) -> Result<Environment> {
        self.inner.create_environment(draft)
    }

    fn update_environment(&self, id: &str, draft: &EnvironmentDraft) -> Result<Environment> {
        self.inner.update_environment(id, draft)
    }

    fn delete_environment(&self, id: &str) -> Result<()> {
        self.inner.delete_environment(id)
    }

    fn list_environment_groups(&self) -> Result<Vec<EnvironmentGroup>> {
        self.inner.list_environment_groups()
    }

    fn get_environment_group(&self, id: &str) -> Result<EnvironmentGroup> {
        self.inner.get_environment_group(id)
    }

    fn create_environment_group(&self, draft: &EnvironmentGroupDraft) -> Result<EnvironmentGroup> {
        self.inner.create_environment_group(draft)
    }

    fn update_environment_group(
        &self,
        id: &str,
        draft: &EnvironmentGroupDraft,
    ) -> Result<EnvironmentGroup> {
        self.inner.update_environment_group(id, draft)
    }

    fn delete_environment_group(&self, id: &str) -> Result<()> {
        self.inner.delete_environment_group(id)
    }

    fn environment_systems(&self, environment_id: &str) -> Result<EnvironmentSystems> {
        self.inner.environment_systems(environment_id)
    }

    fn add_system_to_environment(
        &self,
        environment_id: &str,
        draft: &DeploymentDraft,
    ) -> Result<Vec<EnvironmentSystem>> {
        self.inner.add_system_to_environment(environment_id, draft)
    }

    fn update_environment_system(
        &self,
        environment_id: &str,
        system_id: &str,
        update: &DeploymentUpdate,
    ) -> Result<()> {
        self.inner
            .update_environment_system(environment_id, system_id, update)
    }

    fn remove_system_from_environment(&self, environment_id: &str, system_id: &str) -> Result<()> {
        self.inner
            .remove_system_from_environment(environment_id, system_id)
    }

    fn sync_environment_systems(&self, environment_id: &str) -> Result<usize> {
        self.inner.sync_environment_systems(environment_id)
    }

    fn me(&self) -> Result<User> {
        self.inner.me()
    }

    fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.inner.login(credentials)
    }

    fn register(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.inner.register(credentials)
    }
}

fn draft(system_id: &str, version: &str) -> BuildDraft {
    BuildDraft {
        system_id: system_id.into(),
        version: version.into(),
        build_date: parse_form_date("2024-02-29").unwrap(),
        release_id: None,
    }
}

#[test]
fn backend_rejection_is_reported_not_swallowed() {
    let shared = Arc::new(LocalBackend::in_memory());
    shared.set_enforce_release_uniqueness(true);

    let fresh = DomainService::new(shared.clone());
    let stale = DomainService::new(Arc::new(StaleReleaseView {
        inner: shared.clone(),
    }));

    let system = fresh
        .create_system(&SystemDraft::new("Alpha", SystemType::System))
        .unwrap();
    let release = fresh.create_release(&ReleaseDraft::new("R")).unwrap();
    let b1 = fresh.create_build(&draft(&system.id, "1.0.0")).unwrap();
    let b2 = fresh.create_build(&draft(&system.id, "1.0.1")).unwrap();

    fresh.attach_build_to_release(&b1.id, &release.id).unwrap();

    let err = stale
        .attach_build_to_release(&b2.id, &release.id)
        .unwrap_err();
    match &err {
        DomainError::ServerRejection {
            context, status, ..
        } => {
            assert_eq!(context, "Failed to add build to release");
            assert_eq!(*status, 400);
        }
        other => panic!("expected a server rejection, got {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        "Failed to add build to release: A build for this system already exists in this release"
    );
    assert!(!err.is_retryable());

    let in_release = fresh.release_builds(&release.id).unwrap();
    assert_eq!(in_release.len(), 1);
    assert_eq!(in_release[0].id, b1.id);
}

#[test]
fn without_server_enforcement_the_stale_client_wins_the_race() {
    let shared = Arc::new(LocalBackend::in_memory());
    let fresh = DomainService::new(shared.clone());
    let stale = DomainService::new(Arc::new(StaleReleaseView {
        inner: shared.clone(),
    }));

    let system = fresh
        .create_system(&SystemDraft::new("Alpha", SystemType::System))
        .unwrap();
    let release = fresh.create_release(&ReleaseDraft::new("R")).unwrap();
    let b1 = fresh.create_build(&draft(&system.id, "1.0.0")).unwrap();
    let b2 = fresh.create_build(&draft(&system.id, "1.0.1")).unwrap();

    fresh.attach_build_to_release(&b1.id, &release.id).unwrap();
    stale.attach_build_to_release(&b2.id, &release.id).unwrap();

    // The fresh client still refuses to add to a release that is already
    // over the limit.
    let b3 = fresh.create_build(&draft(&system.id, "1.0.2")).unwrap();
    assert!(fresh.attach_build_to_release(&b3.id, &release.id).is_err());
    assert_eq!(fresh.release_builds(&release.id).unwrap().len(), 2);
}
