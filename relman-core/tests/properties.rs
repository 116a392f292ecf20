use std::sync::Arc;

use pretty_assertions::assert_eq;
use relman_core::rules::{can_delete_system, resolve_system_type};
use relman_core::{
    parse_form_date, subsystems_of, project, Build, BuildDraft, DomainError, DomainService,
    LocalBackend, LookupContext, ReleaseDraft, SortOrder, System, SystemDraft, SystemStatus,
    SystemType, ValidationError, ViewOptions,
};

fn service() -> DomainService<LocalBackend> {
    DomainService::new(Arc::new(LocalBackend::in_memory()))
}

fn draft(system_id: &str, version: &str) -> BuildDraft {
    BuildDraft {
        system_id: system_id.into(),
        version: version.into(),
        build_date: parse_form_date("2024-04-15").unwrap(),
        release_id: None,
    }
}

fn ids(builds: &[Build]) -> Vec<String> {
    builds.iter().map(|b| b.id.clone()).collect()
}

fn is_duplicate(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::Validation(ValidationError::DuplicateSystemInRelease { .. })
    )
}

#[test]
fn second_build_of_a_system_is_rejected_in_either_order() {
    for first_is_newer in [false, true] {
        let service = service();
        let system = service
            .create_system(&SystemDraft::new("Alpha", SystemType::System))
            .unwrap();
        let release = service.create_release(&ReleaseDraft::new("R")).unwrap();
        let b1 = service.create_build(&draft(&system.id, "1.0.0")).unwrap();
        let b2 = service.create_build(&draft(&system.id, "1.0.1")).unwrap();

        let (first, second) = if first_is_newer { (&b2, &b1) } else { (&b1, &b2) };

        service.attach_build_to_release(&first.id, &release.id).unwrap();
        let err = service
            .attach_build_to_release(&second.id, &release.id)
            .unwrap_err();
        assert!(is_duplicate(&err), "unexpected error: {:?}", err);

        match err {
            DomainError::Validation(ValidationError::DuplicateSystemInRelease {
                system_name,
                existing_build_id,
                ..
            }) => {
                assert_eq!(system_name, "Alpha");
                assert_eq!(existing_build_id, first.id);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

#[test]
fn detach_and_reattach_round_trip() {
    let service = service();
    let system = service
        .create_system(&SystemDraft::new("Alpha", SystemType::System))
        .unwrap();
    let release = service.create_release(&ReleaseDraft::new("R")).unwrap();
    let build = service.create_build(&draft(&system.id, "1.0.0")).unwrap();

    service.attach_build_to_release(&build.id, &release.id).unwrap();
    // Already in the release: not a conflict with itself
    service.attach_build_to_release(&build.id, &release.id).unwrap();

    service.detach_build_from_release(&build.id).unwrap();
    assert!(service.release_builds(&release.id).unwrap().is_empty());

    let reattached = service.attach_build_to_release(&build.id, &release.id).unwrap();
    assert_eq!(reattached.version, "1.0.0");
    assert_eq!(reattached.build_date, build.build_date);
    assert_eq!(ids(&service.release_builds(&release.id).unwrap()), vec![build.id]);
}

#[test]
fn subsystem_form_keeps_parent_only_while_subsystem() {
    let mut form = SystemDraft::subsystem_of("Auth", "P");
    assert_eq!(resolve_system_type(&form).as_deref(), Some("P"));

    for other in [SystemType::System, SystemType::ParentSystem] {
        form.system_type = other;
        assert_eq!(resolve_system_type(&form), None);
    }
}

#[test]
fn can_delete_iff_no_children() {
    let system = |id: &str, parent: Option<&str>| System {
        id: id.into(),
        name: id.into(),
        description: None,
        system_type: if parent.is_some() {
            SystemType::Subsystem
        } else {
            SystemType::ParentSystem
        },
        status: SystemStatus::Active,
        parent_id: parent.map(Into::into),
        created_at: None,
        updated_at: None,
    };

    let p = system("p", None);
    assert!(can_delete_system(&p, &[]));
    assert!(can_delete_system(&p, &[p.clone(), system("q", None)]));
    assert!(!can_delete_system(&p, &[p.clone(), system("c", Some("p"))]));
    assert!(can_delete_system(&p, &[system("c", Some("q"))]));
}

#[test]
fn projection_sort_is_stable() {
    let service = service();
    let system = service
        .create_system(&SystemDraft::new("Alpha", SystemType::System))
        .unwrap();
    for version in ["1.0.0", "1.0.1", "1.0.2"] {
        service.create_build(&draft(&system.id, version)).unwrap();
    }
    let builds = service.builds().unwrap();
    let input: Vec<&str> = builds.iter().map(|b| b.id.as_str()).collect();

    for order in [SortOrder::Asc, SortOrder::Desc] {
        let sorted = project(
            &builds,
            &ViewOptions::new().sort("build_date", order),
            &LookupContext::default(),
        );
        let output: Vec<&str> = sorted.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(output, input, "order {}", order);
    }
}

#[test]
fn parent_with_subsystem_cannot_be_deleted_first() {
    let service = service();
    let core = service
        .create_system(&SystemDraft::new("Core", SystemType::ParentSystem))
        .unwrap();
    let auth = service
        .create_system(&SystemDraft::subsystem_of("Auth", &core.id))
        .unwrap();

    let systems = service.systems().unwrap();
    let children = subsystems_of(&core.id, &systems);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "Auth");

    let err = service.delete_system(&core.id).unwrap_err();
    match err {
        DomainError::Validation(ValidationError::HasChildren { children, .. }) => {
            assert_eq!(children, vec!["Auth".to_string()])
        }
        other => panic!("unexpected error: {:?}", other),
    }

    service.delete_system(&auth.id).unwrap();
    service.delete_system(&core.id).unwrap();
    assert!(service.systems().unwrap().is_empty());
}

#[test]
fn release_keeps_first_build_after_duplicate_attempt() {
    let service = service();
    let sys_a = service
        .create_system(&SystemDraft::new("sysA", SystemType::System))
        .unwrap();
    let release = service.create_release(&ReleaseDraft::new("R")).unwrap();
    assert!(service.release_builds(&release.id).unwrap().is_empty());

    let b = service.create_build(&draft(&sys_a.id, "1.0.0")).unwrap();
    service.attach_build_to_release(&b.id, &release.id).unwrap();
    assert_eq!(ids(&service.release_builds(&release.id).unwrap()), vec![b.id.clone()]);

    let b2 = service.create_build(&draft(&sys_a.id, "1.0.1")).unwrap();
    let err = service.attach_build_to_release(&b2.id, &release.id).unwrap_err();
    assert!(is_duplicate(&err));
    assert_eq!(ids(&service.release_builds(&release.id).unwrap()), vec![b.id]);
    assert_eq!(service.build(&b2.id).unwrap().release_id, None);
}

#[test]
fn creating_a_build_directly_in_a_release_is_checked_too() {
    let service = service();
    let system = service
        .create_system(&SystemDraft::new("Alpha", SystemType::System))
        .unwrap();
    let release = service.create_release(&ReleaseDraft::new("R")).unwrap();

    let mut first = draft(&system.id, "1.0.0");
    first.release_id = Some(release.id.clone());
    service.create_build(&first).unwrap();

    let mut second = draft(&system.id, "1.0.1");
    second.release_id = Some(release.id.clone());
    let err = service.create_build(&second).unwrap_err();
    assert!(is_duplicate(&err));
    assert_eq!(service.builds().unwrap().len(), 1);
}

#[test]
fn subsystems_are_unique_independently_of_their_parent() {
    let service = service();
    let core = service
        .create_system(&SystemDraft::new("Core", SystemType::ParentSystem))
        .unwrap();
    let auth = service
        .create_system(&SystemDraft::subsystem_of("Auth", &core.id))
        .unwrap();
    let release = service.create_release(&ReleaseDraft::new("R")).unwrap();

    let parent_build = service.create_build(&draft(&core.id, "2.0.0")).unwrap();
    let child_build = service.create_build(&draft(&auth.id, "0.9.0")).unwrap();

    service.attach_build_to_release(&parent_build.id, &release.id).unwrap();
    service.attach_build_to_release(&child_build.id, &release.id).unwrap();
    assert_eq!(service.release_builds(&release.id).unwrap().len(), 2);
}
