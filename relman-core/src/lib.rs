pub mod backend;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod query;
pub mod rules;
pub mod service;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use backend::{create_backend, Backend, BackendType, HttpBackend, LocalBackend};
pub use config::{get_config_path, Config, Profile};
pub use error::{BackendError, DomainError, Result, ValidationError};
pub use hierarchy::{
    available_parents, descendants_of, parent_name, root_systems, subsystems_of, system_counts,
    system_tree, SystemCounts, SystemNode,
};
pub use models::{
    format_wire_date, parse_form_date, parse_timestamp, AuthResponse, Build, BuildDraft,
    Credentials, DeploymentDraft, DeploymentStatus, DeploymentUpdate, Environment,
    EnvironmentDraft, EnvironmentGroup, EnvironmentGroupDraft, EnvironmentStatus,
    EnvironmentSystem, EnvironmentSystems, EnvironmentType, NamedRef, Release, ReleaseDraft,
    ReleaseStatus, ReleaseType, System, SystemDraft, SystemStatus, SystemType, User,
};
pub use query::{project, FieldValue, LookupContext, Projectable, SortOrder, TypeFilter, ViewOptions};
pub use rules::VersionDrift;
pub use service::DomainService;
pub use storage::{DeploymentRecord, Snapshot, SnapshotStorage};
pub use store::{Collection, EntityKind, EntityStore, RefreshTicket};
