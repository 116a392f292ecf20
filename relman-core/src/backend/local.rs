//! Local backend
//!
//! Serves the REST surface from an in-process [`Snapshot`], either purely in
//! memory or persisted to a locked YAML file. It applies the same checks the
//! reference server applies, so callers see the same rejections offline.

use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::traits::{Backend, BackendType, Result};
use crate::error::BackendError;
use crate::models::{
    AuthResponse, Build, BuildDraft, Credentials, DeploymentDraft, DeploymentUpdate, Environment,
    EnvironmentDraft, EnvironmentGroup, EnvironmentGroupDraft, EnvironmentSystem,
    EnvironmentSystems, NamedRef, Release, ReleaseDraft, System, SystemDraft, User,
};
use crate::rules;
use crate::storage::{DeploymentRecord, Snapshot, SnapshotStorage};

/// Local implementation of [`Backend`]
pub struct LocalBackend {
    memory: Mutex<Snapshot>,
    storage: Option<SnapshotStorage>,
    enforce_release_uniqueness: AtomicBool,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalBackend {
    pub fn in_memory() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            memory: Mutex::new(snapshot),
            storage: None,
            enforce_release_uniqueness: AtomicBool::new(false),
        }
    }

    /// Backend persisted to a YAML snapshot at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            memory: Mutex::new(Snapshot::default()),
            storage: Some(SnapshotStorage::new(path)),
            enforce_release_uniqueness: AtomicBool::new(false),
        }
    }

    /// Also reject a second build of the same system in one release
    ///
    /// The reference server does not enforce this, so it is off by default.
    pub fn set_enforce_release_uniqueness(&self, enforce: bool) {
        self.enforce_release_uniqueness
            .store(enforce, Ordering::SeqCst);
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.read(|s| s.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T> {
        match &self.storage {
            Some(storage) => {
                let snapshot = storage
                    .load()
                    .map_err(|e| BackendError::Storage(format!("{:#}", e)))?;
                Ok(f(&snapshot))
            }
            None => {
                let guard = self.memory.lock().unwrap_or_else(|e| e.into_inner());
                Ok(f(&guard))
            }
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        match &self.storage {
            Some(storage) => {
                let mut outcome = None;
                storage
                    .update_atomically(|snapshot| {
                        let result = f(snapshot);
                        let commit = result.is_ok();
                        outcome = Some(result);
                        commit
                    })
                    .map_err(|e| BackendError::Storage(format!("{:#}", e)))?;
                outcome.unwrap_or_else(|| Err(BackendError::Storage("update was not applied".into())))
            }
            None => {
                let mut guard = self.memory.lock().unwrap_or_else(|e| e.into_inner());
                // Work on a copy so a rejected mutation leaves no trace
                let mut working = guard.clone();
                let result = f(&mut working)?;
                *guard = working;
                Ok(result)
            }
        }
    }

    fn uniqueness_enforced(&self) -> bool {
        self.enforce_release_uniqueness.load(Ordering::SeqCst)
    }
}

fn bad_request(message: impl Into<String>) -> BackendError {
    BackendError::Rejected {
        status: 400,
        message: message.into(),
    }
}

fn not_found(entity: &str, id: &str) -> BackendError {
    BackendError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn required(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} is required", field)));
    }
    Ok(())
}

/// Attaches embedded system and release names, like the server's preload
fn with_refs(snapshot: &Snapshot, build: &Build) -> Build {
    let mut build = build.clone();
    build.system = snapshot
        .systems
        .iter()
        .find(|s| s.id == build.system_id)
        .map(|s| NamedRef {
            id: s.id.clone(),
            name: s.name.clone(),
        });
    build.release = build.release_id.as_deref().and_then(|rid| {
        snapshot.releases.iter().find(|r| r.id == rid).map(|r| NamedRef {
            id: r.id.clone(),
            name: r.name.clone(),
        })
    });
    build
}

fn check_parent(snapshot: &Snapshot, parent_id: Option<&str>, verb: &str) -> Result<()> {
    let Some(parent_id) = parent_id.filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    let parent = snapshot
        .systems
        .iter()
        .find(|s| s.id == parent_id)
        .ok_or_else(|| bad_request("Parent system not found"))?;
    if parent.parent_id.as_deref().is_some_and(|p| !p.is_empty()) {
        return Err(bad_request(format!(
            "Cannot {} under a subsystem. Only 2-level hierarchy is allowed (System -> Subsystem)",
            verb
        )));
    }
    Ok(())
}

fn check_build_refs(snapshot: &Snapshot, draft: &BuildDraft) -> Result<()> {
    required(&draft.system_id, "system_id")?;
    required(&draft.version, "version")?;
    if !snapshot.systems.iter().any(|s| s.id == draft.system_id) {
        return Err(bad_request("System not found"));
    }
    if let Some(release_id) = draft.release_id.as_deref().filter(|r| !r.is_empty()) {
        if !snapshot.releases.iter().any(|r| r.id == release_id) {
            return Err(bad_request("Release not found"));
        }
    }
    Ok(())
}

fn check_release_slot(snapshot: &Snapshot, draft: &BuildDraft, build_id: Option<&str>) -> Result<()> {
    let Some(release_id) = draft.release_id.as_deref() else {
        return Ok(());
    };
    let taken = snapshot.builds.iter().any(|b| {
        b.release_id.as_deref() == Some(release_id)
            && b.system_id == draft.system_id
            && Some(b.id.as_str()) != build_id
    });
    if taken {
        return Err(bad_request(
            "A build for this system already exists in this release",
        ));
    }
    Ok(())
}

fn environment_release(snapshot: &Snapshot, environment_id: &str) -> Result<Vec<Build>> {
    let environment = snapshot
        .environments
        .iter()
        .find(|e| e.id == environment_id)
        .ok_or_else(|| not_found("Environment", environment_id))?;
    Ok(snapshot
        .builds
        .iter()
        .filter(|b| b.release_id.as_deref() == Some(environment.release_id.as_str()))
        .cloned()
        .collect())
}

fn check_version(snapshot: &Snapshot, system: &System, version: &str) -> Result<()> {
    rules::check_version_available(system, version, &snapshot.builds).map_err(|_| {
        bad_request(format!(
            "Version {} not found for system {}. Available versions: [{}]",
            version,
            system.name,
            rules::available_versions(&snapshot.builds, &system.id).join(" ")
        ))
    })
}

fn deployed(snapshot: &Snapshot, record: &DeploymentRecord) -> EnvironmentSystem {
    EnvironmentSystem {
        system_id: record.system_id.clone(),
        system_name: snapshot
            .systems
            .iter()
            .find(|s| s.id == record.system_id)
            .map(|s| s.name.clone())
            .unwrap_or_default(),
        status: record.status,
        version: record.version.clone(),
    }
}

fn local_user() -> User {
    User {
        id: 1,
        email: "local@localhost".to_string(),
        is_admin: true,
        created_at: None,
    }
}

impl Backend for LocalBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    fn location(&self) -> String {
        match &self.storage {
            Some(storage) => storage.path().display().to_string(),
            None => "memory".to_string(),
        }
    }

    fn list_releases(&self) -> Result<Vec<Release>> {
        self.read(|s| s.releases.clone())
    }

    fn get_release(&self, id: &str) -> Result<Release> {
        self.read(|s| s.releases.iter().find(|r| r.id == id).cloned())?
            .ok_or_else(|| not_found("Release", id))
    }

    fn create_release(&self, draft: &ReleaseDraft) -> Result<Release> {
        required(&draft.name, "name")?;
        self.write(|s| {
            let now = Utc::now();
            let release = Release {
                id: new_id(),
                name: draft.name.trim().to_string(),
                description: draft.description.clone(),
                release_date: draft.release_date,
                status: draft.status,
                release_type: draft.release_type,
                created_at: Some(now),
                updated_at: Some(now),
            };
            s.releases.push(release.clone());
            Ok(release)
        })
    }

    fn update_release(&self, id: &str, draft: &ReleaseDraft) -> Result<Release> {
        required(&draft.name, "name")?;
        self.write(|s| {
            let release = s
                .releases
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| not_found("Release", id))?;
            release.name = draft.name.trim().to_string();
            release.description = draft.description.clone();
            release.release_date = draft.release_date;
            release.status = draft.status;
            release.release_type = draft.release_type;
            release.updated_at = Some(Utc::now());
            Ok(release.clone())
        })
    }

    fn delete_release(&self, id: &str) -> Result<()> {
        self.write(|s| {
            let before = s.releases.len();
            s.releases.retain(|r| r.id != id);
            if s.releases.len() == before {
                return Err(not_found("Release", id));
            }
            // Builds outlive their release and fall back to unassociated
            for build in s.builds.iter_mut() {
                if build.release_id.as_deref() == Some(id) {
                    build.release_id = None;
                }
            }
            Ok(())
        })
    }

    fn release_builds(&self, id: &str) -> Result<Vec<Build>> {
        self.read(|s| {
            if !s.releases.iter().any(|r| r.id == id) {
                return Err(not_found("Release", id));
            }
            Ok(s.builds
                .iter()
                .filter(|b| b.release_id.as_deref() == Some(id))
                .map(|b| with_refs(s, b))
                .collect())
        })?
    }

    fn list_builds(&self) -> Result<Vec<Build>> {
        self.read(|s| s.builds.iter().map(|b| with_refs(s, b)).collect())
    }

    fn get_build(&self, id: &str) -> Result<Build> {
        self.read(|s| s.builds.iter().find(|b| b.id == id).map(|b| with_refs(s, b)))?
            .ok_or_else(|| not_found("Build", id))
    }

    fn create_build(&self, draft: &BuildDraft) -> Result<Build> {
        let enforce = self.uniqueness_enforced();
        self.write(|s| {
            check_build_refs(s, draft)?;
            if enforce {
                check_release_slot(s, draft, None)?;
            }
            let now = Utc::now();
            let build = Build {
                id: new_id(),
                system_id: draft.system_id.clone(),
                release_id: draft.release_id.clone().filter(|r| !r.is_empty()),
                version: draft.version.trim().to_string(),
                build_date: Some(draft.build_date),
                created_at: Some(now),
                updated_at: Some(now),
                system: None,
                release: None,
            };
            s.builds.push(build.clone());
            Ok(with_refs(s, &build))
        })
    }

    fn update_build(&self, id: &str, draft: &BuildDraft) -> Result<Build> {
        let enforce = self.uniqueness_enforced();
        self.write(|s| {
            if !s.builds.iter().any(|b| b.id == id) {
                return Err(not_found("Build", id));
            }
            check_build_refs(s, draft)?;
            if enforce {
                check_release_slot(s, draft, Some(id))?;
            }
            let build = s
                .builds
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or_else(|| not_found("Build", id))?;
            build.system_id = draft.system_id.clone();
            build.release_id = draft.release_id.clone().filter(|r| !r.is_empty());
            build.version = draft.version.trim().to_string();
            build.build_date = Some(draft.build_date);
            build.updated_at = Some(Utc::now());
            let updated = build.clone();
            Ok(with_refs(s, &updated))
        })
    }

    fn delete_build(&self, id: &str) -> Result<()> {
        self.write(|s| {
            let before = s.builds.len();
            s.builds.retain(|b| b.id != id);
            if s.builds.len() == before {
                return Err(not_found("Build", id));
            }
            Ok(())
        })
    }

    fn list_systems(&self) -> Result<Vec<System>> {
        self.read(|s| s.systems.clone())
    }

    fn get_system(&self, id: &str) -> Result<System> {
        self.read(|s| s.systems.iter().find(|sys| sys.id == id).cloned())?
            .ok_or_else(|| not_found("System", id))
    }

    fn create_system(&self, draft: &SystemDraft) -> Result<System> {
        required(&draft.name, "name")?;
        self.write(|s| {
            check_parent(s, draft.parent_id.as_deref(), "create subsystem")?;
            let now = Utc::now();
            let system = System {
                id: new_id(),
                name: draft.name.trim().to_string(),
                description: draft.description.clone(),
                system_type: draft.system_type,
                status: draft.status,
                parent_id: draft.parent_id.clone().filter(|p| !p.is_empty()),
                created_at: Some(now),
                updated_at: Some(now),
            };
            s.systems.push(system.clone());
            Ok(system)
        })
    }

    fn update_system(&self, id: &str, draft: &SystemDraft) -> Result<System> {
        required(&draft.name, "name")?;
        self.write(|s| {
            if !s.systems.iter().any(|sys| sys.id == id) {
                return Err(not_found("System", id));
            }
            let parent_id = draft.parent_id.clone().filter(|p| !p.is_empty());
            if parent_id.as_deref() == Some(id) {
                return Err(bad_request("A system cannot be its own parent"));
            }
            check_parent(s, parent_id.as_deref(), "move system")?;
            if parent_id.is_some() && s.systems.iter().any(|c| c.parent_id.as_deref() == Some(id)) {
                return Err(bad_request(
                    "Cannot move a system with subsystems under another system. Only 2-level hierarchy is allowed",
                ));
            }
            let system = s
                .systems
                .iter_mut()
                .find(|sys| sys.id == id)
                .ok_or_else(|| not_found("System", id))?;
            system.name = draft.name.trim().to_string();
            system.description = draft.description.clone();
            system.system_type = draft.system_type;
            system.status = draft.status;
            system.parent_id = parent_id;
            system.updated_at = Some(Utc::now());
            Ok(system.clone())
        })
    }

    fn delete_system(&self, id: &str) -> Result<()> {
        self.write(|s| {
            if s.systems.iter().any(|c| c.parent_id.as_deref() == Some(id)) {
                return Err(bad_request(
                    "Cannot delete system with subsystems. Please delete subsystems first",
                ));
            }
            let before = s.systems.len();
            s.systems.retain(|sys| sys.id != id);
            if s.systems.len() == before {
                return Err(not_found("System", id));
            }
            s.deployments.retain(|d| d.system_id != id);
            Ok(())
        })
    }

    fn list_environments(&self) -> Result<Vec<Environment>> {
        self.read(|s| s.environments.clone())
    }

    fn get_environment(&self, id: &str) -> Result<Environment> {
        self.read(|s| s.environments.iter().find(|e| e.id == id).cloned())?
            .ok_or_else(|| not_found("Environment", id))
    }

    fn create_environment(&self, draft: &EnvironmentDraft) -> Result<Environment> {
        required(&draft.name, "name")?;
        required(&draft.release_id, "release_id")?;
        self.write(|s| {
            if !s.releases.iter().any(|r| r.id == draft.release_id) {
                return Err(bad_request("Release not found"));
            }
            let now = Utc::now();
            let environment = Environment {
                id: new_id(),
                name: draft.name.trim().to_string(),
                env_type: draft.env_type,
                status: draft.status,
                url: draft.url.clone(),
                description: draft.description.clone(),
                release_id: draft.release_id.clone(),
                environment_group_id: draft.environment_group_id.clone(),
                created_at: Some(now),
                updated_at: Some(now),
            };
            s.environments.push(environment.clone());
            Ok(environment)
        })
    }

    fn update_environment(&self, id: &str, draft: &EnvironmentDraft) -> Result<Environment> {
        required(&draft.name, "name")?;
        required(&draft.release_id, "release_id")?;
        self.write(|s| {
            if !s.releases.iter().any(|r| r.id == draft.release_id) {
                return Err(bad_request("Release not found"));
            }
            let environment = s
                .environments
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| not_found("Environment", id))?;
            environment.name = draft.name.trim().to_string();
            environment.env_type = draft.env_type;
            environment.status = draft.status;
            environment.url = draft.url.clone();
            environment.description = draft.description.clone();
            environment.release_id = draft.release_id.clone();
            environment.environment_group_id = draft.environment_group_id.clone();
            environment.updated_at = Some(Utc::now());
            Ok(environment.clone())
        })
    }

    fn delete_environment(&self, id: &str) -> Result<()> {
        self.write(|s| {
            let before = s.environments.len();
            s.environments.retain(|e| e.id != id);
            if s.environments.len() == before {
                return Err(not_found("Environment", id));
            }
            s.deployments.retain(|d| d.environment_id != id);
            Ok(())
        })
    }

    fn list_environment_groups(&self) -> Result<Vec<EnvironmentGroup>> {
        self.read(|s| s.environment_groups.clone())
    }

    fn get_environment_group(&self, id: &str) -> Result<EnvironmentGroup> {
        self.read(|s| s.environment_groups.iter().find(|g| g.id == id).cloned())?
            .ok_or_else(|| not_found("Environment Group", id))
    }

    fn create_environment_group(&self, draft: &EnvironmentGroupDraft) -> Result<EnvironmentGroup> {
        required(&draft.name, "name")?;
        self.write(|s| {
            let now = Utc::now();
            let group = EnvironmentGroup {
                id: new_id(),
                name: draft.name.trim().to_string(),
                description: draft.description.clone(),
                created_at: Some(now),
                updated_at: Some(now),
            };
            s.environment_groups.push(group.clone());
            Ok(group)
        })
    }

    fn update_environment_group(
        &self,
        id: &str,
        draft: &EnvironmentGroupDraft,
    ) -> Result<EnvironmentGroup> {
        required(&draft.name, "name")?;
        self.write(|s| {
            let group = s
                .environment_groups
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| not_found("Environment Group", id))?;
            group.name = draft.name.trim().to_string();
            group.description = draft.description.clone();
            group.updated_at = Some(Utc::now());
            Ok(group.clone())
        })
    }

    fn delete_environment_group(&self, id: &str) -> Result<()> {
        self.write(|s| {
            if s
                .environments
                .iter()
                .any(|e| e.environment_group_id.as_deref() == Some(id))
            {
                return Err(bad_request(
                    "Cannot delete environment group that has associated environments. \
                     Please reassign or delete environments first.",
                ));
            }
            let before = s.environment_groups.len();
            s.environment_groups.retain(|g| g.id != id);
            if s.environment_groups.len() == before {
                return Err(not_found("Environment Group", id));
            }
            Ok(())
        })
    }

    fn environment_systems(&self, environment_id: &str) -> Result<EnvironmentSystems> {
        self.read(|s| {
            let environment = s
                .environments
                .iter()
                .find(|e| e.id == environment_id)
                .ok_or_else(|| not_found("Environment", environment_id))?;
            Ok(EnvironmentSystems {
                environment_id: environment.id.clone(),
                environment_name: environment.name.clone(),
                systems: s
                    .deployments
                    .iter()
                    .filter(|d| d.environment_id == environment_id)
                    .map(|d| deployed(s, d))
                    .collect(),
            })
        })?
    }

    fn add_system_to_environment(
        &self,
        environment_id: &str,
        draft: &DeploymentDraft,
    ) -> Result<Vec<EnvironmentSystem>> {
        required(&draft.system_id, "system_id")?;
        self.write(|s| {
            let release_builds = environment_release(s, environment_id)?;
            let system = s
                .systems
                .iter()
                .find(|sys| sys.id == draft.system_id)
                .ok_or_else(|| not_found("System", &draft.system_id))?;

            let now = Utc::now();
            let mut records = Vec::new();
            for target in rules::deployment_targets(system, &s.systems) {
                let present = s
                    .deployments
                    .iter()
                    .any(|d| d.environment_id == environment_id && d.system_id == target.id);
                if present {
                    continue;
                }
                let version = match draft.version.as_deref().filter(|v| !v.is_empty()) {
                    Some(version) => {
                        check_version(s, target, version)?;
                        version.to_string()
                    }
                    None => rules::release_version(&release_builds, &target.id)
                        .unwrap_or_default()
                        .to_string(),
                };
                records.push(DeploymentRecord {
                    id: new_id(),
                    environment_id: environment_id.to_string(),
                    system_id: target.id.clone(),
                    version,
                    status: draft.status.unwrap_or_default(),
                    created_at: Some(now),
                    updated_at: Some(now),
                });
            }

            let added: Vec<EnvironmentSystem> = records.iter().map(|r| deployed(&*s, r)).collect();
            s.deployments.extend(records);
            Ok(added)
        })
    }

    fn update_environment_system(
        &self,
        environment_id: &str,
        system_id: &str,
        update: &DeploymentUpdate,
    ) -> Result<()> {
        self.write(|s| {
            let index = s
                .deployments
                .iter()
                .position(|d| d.environment_id == environment_id && d.system_id == system_id)
                .ok_or_else(|| not_found("Environment system", system_id))?;
            let version = update.version.as_deref().filter(|v| !v.is_empty());
            if let Some(version) = version {
                let system = s
                    .systems
                    .iter()
                    .find(|sys| sys.id == system_id)
                    .ok_or_else(|| not_found("System", system_id))?;
                check_version(s, system, version)?;
            }

            let record = &mut s.deployments[index];
            if let Some(version) = version {
                record.version = version.to_string();
            }
            if let Some(status) = update.status {
                record.status = status;
            }
            record.updated_at = Some(Utc::now());
            Ok(())
        })
    }

    fn remove_system_from_environment(&self, environment_id: &str, system_id: &str) -> Result<()> {
        self.write(|s| {
            let before = s.deployments.len();
            s.deployments
                .retain(|d| !(d.environment_id == environment_id && d.system_id == system_id));
            if s.deployments.len() == before {
                return Err(not_found("Environment system", system_id));
            }
            Ok(())
        })
    }

    fn sync_environment_systems(&self, environment_id: &str) -> Result<usize> {
        self.write(|s| {
            let release_builds = environment_release(s, environment_id)?;
            let now = Utc::now();
            let mut updated = 0;
            for record in s
                .deployments
                .iter_mut()
                .filter(|d| d.environment_id == environment_id)
            {
                let version =
                    rules::release_version(&release_builds, &record.system_id).unwrap_or_default();
                if record.version != version {
                    record.version = version.to_string();
                    record.updated_at = Some(now);
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    fn me(&self) -> Result<User> {
        Ok(local_user())
    }

    fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        required(&credentials.email, "email")?;
        Ok(AuthResponse {
            token: "local".to_string(),
            user: User {
                email: credentials.email.clone(),
                ..local_user()
            },
        })
    }

    fn register(&self, credentials: &Credentials) -> Result<AuthResponse> {
        if credentials.password.len() < 6 {
            return Err(bad_request("password must be at least 6 characters"));
        }
        self.login(credentials)
    }
}
