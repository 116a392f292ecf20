//! Association rules
//!
//! Pure checks run before a mutation is sent. They work on whatever the
//! caller fetched last; the backend can still reject a change that passes
//! here, and that rejection wins.

use crate::error::ValidationError;
use crate::models::{
    Build, BuildDraft, DeploymentDraft, EnvironmentDraft, EnvironmentGroupDraft, EnvironmentSystem,
    ReleaseDraft, System, SystemDraft, SystemType,
};

pub const UNKNOWN_SYSTEM: &str = "Unknown System";

type Result<T> = std::result::Result<T, ValidationError>;

fn display_system_name(system_id: &str, systems: &[System], embedded: &[Option<&str>]) -> String {
    systems
        .iter()
        .find(|s| s.id == system_id)
        .map(|s| s.name.as_str())
        .or_else(|| embedded.iter().copied().flatten().next())
        .unwrap_or(UNKNOWN_SYSTEM)
        .to_string()
}

fn slot_conflict<'a>(
    build_id: Option<&str>,
    system_id: &str,
    target_release_id: &str,
    release_builds: &'a [Build],
) -> Option<&'a Build> {
    release_builds.iter().find(|b| {
        b.system_id == system_id
            && Some(b.id.as_str()) != build_id
            && b.release_id.as_deref().map_or(true, |r| r == target_release_id)
    })
}

/// Checks that a release has no other build for `system_id`
///
/// `build_id` is the build being placed, if it already exists; it never
/// conflicts with itself. Builds in `release_builds` that name a different
/// release are ignored.
pub fn check_release_slot(
    build_id: Option<&str>,
    system_id: &str,
    target_release_id: &str,
    release_builds: &[Build],
    systems: &[System],
) -> Result<()> {
    match slot_conflict(build_id, system_id, target_release_id, release_builds) {
        Some(existing) => Err(ValidationError::DuplicateSystemInRelease {
            system_id: system_id.to_string(),
            system_name: display_system_name(
                system_id,
                systems,
                &[existing.embedded_system_name()],
            ),
            existing_build_id: existing.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Checks whether `build` may join `target_release_id`
pub fn check_attach(
    build: &Build,
    target_release_id: &str,
    release_builds: &[Build],
    systems: &[System],
) -> Result<()> {
    match slot_conflict(Some(&build.id), &build.system_id, target_release_id, release_builds) {
        Some(existing) => Err(ValidationError::DuplicateSystemInRelease {
            system_id: build.system_id.clone(),
            system_name: display_system_name(
                &build.system_id,
                systems,
                &[build.embedded_system_name(), existing.embedded_system_name()],
            ),
            existing_build_id: existing.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Full update record that places `build` in `release_id`
pub fn attach_record(build: &Build, release_id: &str) -> Result<BuildDraft> {
    let mut draft = build.to_draft()?;
    draft.release_id = Some(release_id.to_string());
    Ok(draft)
}

/// Full update record that takes `build` out of its release
pub fn detach_record(build: &Build) -> Result<BuildDraft> {
    let mut draft = build.to_draft()?;
    draft.release_id = None;
    Ok(draft)
}

fn children_of<'a>(system_id: &'a str, all: &'a [System]) -> impl Iterator<Item = &'a System> + 'a {
    all.iter()
        .filter(move |s| s.parent_id.as_deref() == Some(system_id))
}

pub fn can_delete_system(system: &System, all: &[System]) -> bool {
    children_of(&system.id, all).next().is_none()
}

pub fn check_delete_system(system: &System, all: &[System]) -> Result<()> {
    let children: Vec<String> = children_of(&system.id, all)
        .map(|s| s.name.clone())
        .collect();
    if children.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::HasChildren {
            system_id: system.id.clone(),
            system_name: system.name.clone(),
            children,
        })
    }
}

/// Effective parent for a system form
///
/// Only subsystems keep a parent; a blank id counts as none.
pub fn resolve_system_type(form: &SystemDraft) -> Option<String> {
    match form.system_type {
        SystemType::Subsystem => form
            .parent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        SystemType::ParentSystem | SystemType::System => None,
    }
}

/// Validates a system form and returns the normalised draft to send
///
/// `editing_id` is the id of the system being edited, `None` on create.
pub fn validate_system_draft(
    draft: &SystemDraft,
    all: &[System],
    editing_id: Option<&str>,
) -> Result<SystemDraft> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField("name".into()));
    }

    let parent_id = resolve_system_type(draft);
    let has_children = editing_id.map_or(false, |id| children_of(id, all).next().is_some());

    if has_children && draft.system_type != SystemType::ParentSystem {
        return Err(ValidationError::InvalidHierarchy(
            "a system with subsystems must remain a parent system".into(),
        ));
    }

    if draft.system_type == SystemType::Subsystem {
        let parent_id = parent_id
            .as_deref()
            .ok_or_else(|| ValidationError::MissingField("parent_id".into()))?;
        if Some(parent_id) == editing_id {
            return Err(ValidationError::InvalidHierarchy(
                "a system cannot be its own parent".into(),
            ));
        }
        let parent = all.iter().find(|s| s.id == parent_id).ok_or_else(|| {
            ValidationError::InvalidHierarchy(format!("parent system '{}' not found", parent_id))
        })?;
        if parent.system_type != SystemType::ParentSystem {
            return Err(ValidationError::InvalidHierarchy(format!(
                "'{}' is not a parent system",
                parent.name
            )));
        }
    }

    Ok(SystemDraft {
        name: name.to_string(),
        parent_id,
        ..draft.clone()
    })
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field.into()))
    } else {
        Ok(())
    }
}

pub fn validate_build_draft(draft: &BuildDraft) -> Result<()> {
    require(&draft.system_id, "system_id")?;
    require(&draft.version, "version")
}

pub fn validate_release_draft(draft: &ReleaseDraft) -> Result<()> {
    require(&draft.name, "name")
}

pub fn validate_environment_draft(draft: &EnvironmentDraft) -> Result<()> {
    require(&draft.name, "name")?;
    require(&draft.release_id, "release_id")
}

pub fn validate_environment_group_draft(draft: &EnvironmentGroupDraft) -> Result<()> {
    require(&draft.name, "name")
}

pub fn validate_deployment_draft(draft: &DeploymentDraft) -> Result<()> {
    require(&draft.system_id, "system_id")
}

/// Version a release ships for a system, from the release's builds
pub fn release_version<'a>(release_builds: &'a [Build], system_id: &str) -> Option<&'a str> {
    release_builds
        .iter()
        .find(|b| b.system_id == system_id)
        .map(|b| b.version.as_str())
}

/// Every version ever built for a system, in build order
pub fn available_versions<'a>(builds: &'a [Build], system_id: &str) -> Vec<&'a str> {
    builds
        .iter()
        .filter(|b| b.system_id == system_id)
        .map(|b| b.version.as_str())
        .collect()
}

/// Systems a deployment of `system` expands to
///
/// A parent system stands for its subsystems; anything else for itself.
pub fn deployment_targets<'a>(system: &'a System, all: &'a [System]) -> Vec<&'a System> {
    if system.system_type == SystemType::ParentSystem {
        children_of(&system.id, all).collect()
    } else {
        vec![system]
    }
}

/// Checks that `version` was built for `system`
pub fn check_version_available(system: &System, version: &str, builds: &[Build]) -> Result<()> {
    if available_versions(builds, &system.id).contains(&version) {
        return Ok(());
    }
    Err(ValidationError::InvalidValue {
        field: format!("version for {}", system.name),
        value: version.to_string(),
    })
}

/// A deployed system whose version differs from what its release ships
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDrift {
    pub system_id: String,
    pub system_name: String,
    pub deployed: String,
    /// Empty when the release has no build of the system
    pub release: String,
}

/// What a sync would change, without changing it
pub fn version_drift(deployed: &[EnvironmentSystem], release_builds: &[Build]) -> Vec<VersionDrift> {
    deployed
        .iter()
        .filter_map(|d| {
            let release = release_version(release_builds, &d.system_id).unwrap_or("");
            (d.version != release).then(|| VersionDrift {
                system_id: d.system_id.clone(),
                system_name: d.system_name.clone(),
                deployed: d.version.clone(),
                release: release.to_string(),
            })
        })
        .collect()
}

/// A build stays with the system it was created for
pub fn check_system_immutable(existing: &Build, draft: &BuildDraft) -> Result<()> {
    if existing.system_id == draft.system_id {
        Ok(())
    } else {
        Err(ValidationError::ImmutableField("system_id".into()))
    }
}
