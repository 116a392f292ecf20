use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::ValidationError;

/// Role of a system in the two-level hierarchy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SystemType {
    /// Top-level system that may own subsystems
    #[serde(rename = "parent_systems")]
    ParentSystem,
    /// Standalone system with no children
    #[default]
    #[serde(rename = "systems")]
    System,
    /// Child of exactly one parent system
    #[serde(rename = "subsystems")]
    Subsystem,
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemType::ParentSystem => write!(f, "Parent System"),
            SystemType::System => write!(f, "System"),
            SystemType::Subsystem => write!(f, "Subsystem"),
        }
    }
}

impl SystemType {
    pub fn all() -> [SystemType; 3] {
        [
            SystemType::ParentSystem,
            SystemType::System,
            SystemType::Subsystem,
        ]
    }

    /// Name used on the wire and in filters
    pub fn wire_name(&self) -> &'static str {
        match self {
            SystemType::ParentSystem => "parent_systems",
            SystemType::System => "systems",
            SystemType::Subsystem => "subsystems",
        }
    }

    /// Parse a system type from its wire name or display label
    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "parent_systems" | "parent_system" | "parent" => Some(SystemType::ParentSystem),
            "systems" | "system" => Some(SystemType::System),
            "subsystems" | "subsystem" => Some(SystemType::Subsystem),
            _ => None,
        }
    }
}

/// Operational status of a system
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Active,
    Deprecated,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemStatus::Active => write!(f, "Active"),
            SystemStatus::Deprecated => write!(f, "Deprecated"),
        }
    }
}

impl SystemStatus {
    pub fn all() -> [SystemStatus; 2] {
        [SystemStatus::Active, SystemStatus::Deprecated]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "active" => Some(SystemStatus::Active),
            "deprecated" => Some(SystemStatus::Deprecated),
            _ => None,
        }
    }
}

/// Lifecycle status of a release
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    #[default]
    Draft,
    Planned,
    #[serde(alias = "in-progress")]
    InProgress,
    #[serde(alias = "completed")]
    Released,
    Deployed,
    Cancelled,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseStatus::Draft => write!(f, "Draft"),
            ReleaseStatus::Planned => write!(f, "Planned"),
            ReleaseStatus::InProgress => write!(f, "In Progress"),
            ReleaseStatus::Released => write!(f, "Released"),
            ReleaseStatus::Deployed => write!(f, "Deployed"),
            ReleaseStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl ReleaseStatus {
    pub fn all() -> [ReleaseStatus; 6] {
        [
            ReleaseStatus::Draft,
            ReleaseStatus::Planned,
            ReleaseStatus::InProgress,
            ReleaseStatus::Released,
            ReleaseStatus::Deployed,
            ReleaseStatus::Cancelled,
        ]
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            ReleaseStatus::Draft => "draft",
            ReleaseStatus::Planned => "planned",
            ReleaseStatus::InProgress => "in_progress",
            ReleaseStatus::Released => "released",
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "draft" => Some(ReleaseStatus::Draft),
            "planned" => Some(ReleaseStatus::Planned),
            "in_progress" | "inprogress" => Some(ReleaseStatus::InProgress),
            "released" | "completed" => Some(ReleaseStatus::Released),
            "deployed" => Some(ReleaseStatus::Deployed),
            "cancelled" | "canceled" => Some(ReleaseStatus::Cancelled),
            _ => None,
        }
    }
}

/// Semantic type of a release
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ReleaseType {
    Major,
    #[default]
    Minor,
    #[serde(alias = "Patch")]
    Hotfix,
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseType::Major => write!(f, "Major"),
            ReleaseType::Minor => write!(f, "Minor"),
            ReleaseType::Hotfix => write!(f, "Hotfix"),
        }
    }
}

impl ReleaseType {
    pub fn all() -> [ReleaseType; 3] {
        [ReleaseType::Major, ReleaseType::Minor, ReleaseType::Hotfix]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "major" => Some(ReleaseType::Major),
            "minor" => Some(ReleaseType::Minor),
            "hotfix" | "patch" => Some(ReleaseType::Hotfix),
            _ => None,
        }
    }
}

/// Kind of deployment environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentType::Dev => write!(f, "Dev"),
            EnvironmentType::Staging => write!(f, "Staging"),
            EnvironmentType::Prod => write!(f, "Prod"),
        }
    }
}

impl EnvironmentType {
    pub fn all() -> [EnvironmentType; 3] {
        [
            EnvironmentType::Dev,
            EnvironmentType::Staging,
            EnvironmentType::Prod,
        ]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "dev" | "development" => Some(EnvironmentType::Dev),
            "staging" | "stage" => Some(EnvironmentType::Staging),
            "prod" | "production" => Some(EnvironmentType::Prod),
            _ => None,
        }
    }
}

/// Operational status of an environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    #[default]
    Active,
    Decommissioned,
    Maintenance,
    Pending,
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentStatus::Active => write!(f, "Active"),
            EnvironmentStatus::Decommissioned => write!(f, "Decommissioned"),
            EnvironmentStatus::Maintenance => write!(f, "Maintenance"),
            EnvironmentStatus::Pending => write!(f, "Pending"),
        }
    }
}

impl EnvironmentStatus {
    pub fn all() -> [EnvironmentStatus; 4] {
        [
            EnvironmentStatus::Active,
            EnvironmentStatus::Decommissioned,
            EnvironmentStatus::Maintenance,
            EnvironmentStatus::Pending,
        ]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "active" => Some(EnvironmentStatus::Active),
            "decommissioned" => Some(EnvironmentStatus::Decommissioned),
            "maintenance" => Some(EnvironmentStatus::Maintenance),
            "pending" => Some(EnvironmentStatus::Pending),
            _ => None,
        }
    }
}

/// Whether a system is live in an environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Active => write!(f, "Active"),
            DeploymentStatus::Inactive => write!(f, "Inactive"),
        }
    }
}

impl DeploymentStatus {
    pub fn all() -> [DeploymentStatus; 2] {
        [DeploymentStatus::Active, DeploymentStatus::Inactive]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "active" => Some(DeploymentStatus::Active),
            "inactive" => Some(DeploymentStatus::Inactive),
            _ => None,
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase().replace([' ', '-'], "_")
}

/// An inventoriable unit of software
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct System {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Role in the hierarchy
    #[serde(rename = "type", default = "legacy_system_type")]
    pub system_type: SystemType,

    #[serde(default)]
    pub status: SystemStatus,

    /// Parent system; only set for subsystems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// Records written before the type column existed carry no type.
fn legacy_system_type() -> SystemType {
    log::warn!("system record without a type; treating it as a standalone system");
    SystemType::System
}

impl System {
    pub fn is_subsystem(&self) -> bool {
        self.system_type == SystemType::Subsystem
    }

    /// Rebuilds the create/update body for this system
    pub fn to_draft(&self) -> SystemDraft {
        SystemDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            system_type: self.system_type,
            status: self.status,
            parent_id: self.parent_id.clone(),
        }
    }
}

/// A named collection of at most one build per system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: ReleaseStatus,

    #[serde(rename = "type", default)]
    pub release_type: ReleaseType,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Release {
    pub fn to_draft(&self) -> ReleaseDraft {
        ReleaseDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            release_date: self.release_date,
            status: self.status,
            release_type: self.release_type,
        }
    }
}

/// Embedded name of a related record, as returned by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NamedRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A concrete versioned artifact of exactly one system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Build {
    pub id: String,

    /// Owning system; fixed at creation
    pub system_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,

    pub version: String,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub build_date: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Preloaded system, when the server includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<NamedRef>,

    /// Preloaded release, when the server includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<NamedRef>,
}

impl Build {
    /// Name of the owning system as embedded by the server, if any
    pub fn embedded_system_name(&self) -> Option<&str> {
        self.system
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|n| !n.is_empty())
    }

    /// Full update record for this build
    ///
    /// The server's update contract requires system_id, version, build_date
    /// and release_id together, so a partial patch is never sent.
    pub fn to_draft(&self) -> Result<BuildDraft, ValidationError> {
        let build_date = self
            .build_date
            .ok_or_else(|| ValidationError::MissingField("build_date".into()))?;
        Ok(BuildDraft {
            system_id: self.system_id.clone(),
            version: self.version.clone(),
            build_date,
            release_id: self.release_id.clone(),
        })
    }
}

/// A deployment target bound to a release
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub id: String,

    pub name: String,

    #[serde(rename = "type", default)]
    pub env_type: EnvironmentType,

    #[serde(default)]
    pub status: EnvironmentStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub release_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_group_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Environment {
    pub fn to_draft(&self) -> EnvironmentDraft {
        EnvironmentDraft {
            name: self.name.clone(),
            env_type: self.env_type,
            status: self.status,
            url: self.url.clone(),
            description: self.description.clone(),
            release_id: self.release_id.clone(),
            environment_group_id: self.environment_group_id.clone(),
        }
    }
}

/// A named set of environments, such as one customer's stack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentGroup {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EnvironmentGroup {
    pub fn to_draft(&self) -> EnvironmentGroupDraft {
        EnvironmentGroupDraft {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// One system deployed in an environment, and the version it runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSystem {
    pub system_id: String,

    #[serde(default)]
    pub system_name: String,

    #[serde(default)]
    pub status: DeploymentStatus,

    /// Empty when the environment's release has no build of the system
    #[serde(default)]
    pub version: String,
}

/// Everything deployed in one environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSystems {
    pub environment_id: String,

    #[serde(default)]
    pub environment_name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub systems: Vec<EnvironmentSystem>,
}

impl EnvironmentSystems {
    pub fn find(&self, system_id: &str) -> Option<&EnvironmentSystem> {
        self.systems.iter().find(|s| s.system_id == system_id)
    }
}

/// Authenticated user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of the login and register endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Token and user returned by login and register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Create/update body for a system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemDraft {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub system_type: SystemType,
    pub status: SystemStatus,
    pub parent_id: Option<String>,
}

impl SystemDraft {
    pub fn new(name: impl Into<String>, system_type: SystemType) -> Self {
        Self {
            name: name.into(),
            description: None,
            system_type,
            status: SystemStatus::Active,
            parent_id: None,
        }
    }

    pub fn subsystem_of(name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..Self::new(name, SystemType::Subsystem)
        }
    }
}

/// Create/update body for a release
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseDraft {
    pub name: String,
    pub description: Option<String>,
    #[serde(serialize_with = "wire_date_opt")]
    pub release_date: Option<DateTime<Utc>>,
    pub status: ReleaseStatus,
    #[serde(rename = "type")]
    pub release_type: ReleaseType,
}

impl ReleaseDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            release_date: None,
            status: ReleaseStatus::default(),
            release_type: ReleaseType::default(),
        }
    }
}

/// Create/update body for a build; always a full record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildDraft {
    pub system_id: String,
    pub version: String,
    #[serde(serialize_with = "wire_date")]
    pub build_date: DateTime<Utc>,
    pub release_id: Option<String>,
}

/// Create/update body for an environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    pub status: EnvironmentStatus,
    pub url: Option<String>,
    pub description: Option<String>,
    pub release_id: String,
    pub environment_group_id: Option<String>,
}

/// Create/update body for an environment group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentGroupDraft {
    pub name: String,
    pub description: Option<String>,
}

impl EnvironmentGroupDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Body for deploying a system into an environment
///
/// A parent system stands for all of its subsystems. Without a version
/// each system gets the one its release ships.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentDraft {
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl DeploymentDraft {
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            version: None,
            status: None,
        }
    }
}

/// Changes to one deployed system; `None` leaves a field alone
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

/// Parses a timestamp the way the server emits it
///
/// Accepts RFC 3339 or a bare `YYYY-MM-DD`. The server's zero time
/// (year 1) means "unset" and yields `None`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        })?;
    if parsed.year() <= 1 {
        return None;
    }
    Some(parsed)
}

/// Parses a date entered in a form
///
/// A date-only value becomes midnight UTC of that day.
pub fn parse_form_date(s: &str) -> Result<DateTime<Utc>, ValidationError> {
    parse_timestamp(s).ok_or_else(|| ValidationError::InvalidDate(s.to_string()))
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SSZ`
pub fn format_wire_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

// The server encodes an empty list as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn wire_date<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_wire_date(date))
}

fn wire_date_opt<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match date {
        Some(d) => wire_date(d, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_form_date_is_midnight_utc() {
        let date = parse_form_date("2024-03-15").unwrap();
        assert_eq!(format_wire_date(&date), "2024-03-15T00:00:00Z");
    }

    #[test]
    fn test_form_date_rejects_garbage() {
        let err = parse_form_date("15/03/2024").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDate(_)));
    }

    #[test]
    fn test_zero_time_is_unset() {
        assert!(parse_timestamp("0001-01-01T00:00:00Z").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_system_wire_format() {
        let json = r#"{
            "id": "s2",
            "name": "Auth",
            "type": "subsystems",
            "status": "active",
            "parent_id": "s1",
            "created_at": "2024-01-02T10:00:00Z",
            "subsystems": []
        }"#;
        let system: System = serde_json::from_str(json).unwrap();
        assert_eq!(system.system_type, SystemType::Subsystem);
        assert_eq!(system.parent_id.as_deref(), Some("s1"));
        assert!(system.is_subsystem());
    }

    #[test]
    fn test_system_without_type_defaults_to_standalone() {
        let system: System = serde_json::from_str(r#"{"id":"s1","name":"Legacy"}"#).unwrap();
        assert_eq!(system.system_type, SystemType::System);
        assert_eq!(system.status, SystemStatus::Active);
    }

    #[test]
    fn test_release_status_accepts_legacy_spelling() {
        let release: Release = serde_json::from_str(
            r#"{"id":"r1","name":"R1","status":"in-progress","type":"Patch","release_date":"not a date"}"#,
        )
        .unwrap();
        assert_eq!(release.status, ReleaseStatus::InProgress);
        assert_eq!(release.release_type, ReleaseType::Hotfix);
        assert!(release.release_date.is_none());
    }

    #[test]
    fn test_build_draft_serializes_full_record() {
        let draft = BuildDraft {
            system_id: "sysA".into(),
            version: "1.0.0".into(),
            build_date: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            release_id: None,
        };
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "system_id": "sysA",
                "version": "1.0.0",
                "build_date": "2024-05-01T00:00:00Z",
                "release_id": null
            })
        );
    }

    #[test]
    fn test_build_to_draft_requires_build_date() {
        let build: Build =
            serde_json::from_str(r#"{"id":"b1","system_id":"s1","version":"1.0"}"#).unwrap();
        assert!(matches!(
            build.to_draft(),
            Err(ValidationError::MissingField(ref f)) if f == "build_date"
        ));
    }

    #[test]
    fn test_build_embedded_system_name_ignores_empty() {
        let build: Build = serde_json::from_str(
            r#"{"id":"b1","system_id":"s1","version":"1.0","system":{"id":"","name":""}}"#,
        )
        .unwrap();
        assert_eq!(build.embedded_system_name(), None);
    }

    #[test]
    fn test_enum_parse_accepts_labels() {
        assert_eq!(SystemType::parse("Parent System"), Some(SystemType::ParentSystem));
        assert_eq!(ReleaseStatus::parse("In Progress"), Some(ReleaseStatus::InProgress));
        assert_eq!(EnvironmentType::parse("production"), Some(EnvironmentType::Prod));
        assert_eq!(ReleaseType::parse("bogus"), None);
        assert_eq!(DeploymentStatus::parse(" Inactive "), Some(DeploymentStatus::Inactive));
    }

    #[test]
    fn test_environment_systems_accepts_null_list() {
        let deployed: EnvironmentSystems = serde_json::from_str(
            r#"{"environment_id":"e1","environment_name":"QA","systems":null}"#,
        )
        .unwrap();
        assert!(deployed.systems.is_empty());

        let deployed: EnvironmentSystems = serde_json::from_str(
            r#"{"environment_id":"e1","systems":[{"system_id":"s1","system_name":"Auth","status":"inactive","version":"1.2"}]}"#,
        )
        .unwrap();
        let auth = deployed.find("s1").unwrap();
        assert_eq!(auth.status, DeploymentStatus::Inactive);
        assert_eq!(auth.version, "1.2");
    }

    #[test]
    fn test_deployment_update_omits_unset_fields() {
        let update = DeploymentUpdate {
            version: Some("2.0".into()),
            status: None,
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "version": "2.0" })
        );
    }
}
