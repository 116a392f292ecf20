//! Filtering, searching and sorting of entity lists
//!
//! [`project`] never mutates its input; it returns references into it in
//! display order. Sorting is stable, so equal keys keep their input order
//! in both directions.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{
    Build, Environment, EnvironmentStatus, EnvironmentType, Release, ReleaseStatus, ReleaseType,
    System, SystemStatus, SystemType,
};

pub const NO_RELEASE: &str = "No Release";
pub const UNKNOWN_RELEASE: &str = "Unknown Release";
pub use crate::rules::UNKNOWN_SYSTEM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// Which systems a system list shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    /// Everything except subsystems
    #[default]
    Root,
    All,
    Only(SystemType),
}

impl TypeFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "root" => Some(TypeFilter::Root),
            "all" => Some(TypeFilter::All),
            other => SystemType::parse(other).map(TypeFilter::Only),
        }
    }

    pub fn matches(&self, system: &System) -> bool {
        match self {
            TypeFilter::Root => !system.is_subsystem(),
            TypeFilter::All => true,
            TypeFilter::Only(t) => system.system_type == *t,
        }
    }
}

/// Options a list view applies to its collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewOptions {
    /// Case-insensitive substring; empty matches everything
    pub search: String,
    /// Column to sort by; `None` uses the entity's default ordering
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    /// Exact-match column filters; empty values are ignored
    pub column_filters: BTreeMap<String, String>,
    /// Only consulted for systems
    pub type_filter: TypeFilter,
}

impl ViewOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = term.into();
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = order;
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.column_filters.insert(key.into(), value.into());
        self
    }

    pub fn type_filter(mut self, filter: TypeFilter) -> Self {
        self.type_filter = filter;
        self
    }
}

/// Sort key extracted from an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// A missing or unparseable date sorts before every real date
    Date(Option<DateTime<Utc>>),
}

impl FieldValue {
    fn text(s: &str) -> Self {
        FieldValue::Text(s.to_lowercase())
    }

    fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Date(_), FieldValue::Text(_)) => Ordering::Less,
            (FieldValue::Text(_), FieldValue::Date(_)) => Ordering::Greater,
        }
    }
}

/// Resolves the names a build displays
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupContext<'a> {
    pub systems: &'a [System],
    pub releases: &'a [Release],
}

impl<'a> LookupContext<'a> {
    pub fn new(systems: &'a [System], releases: &'a [Release]) -> Self {
        Self { systems, releases }
    }

    pub fn system_name(&self, id: &str) -> &'a str {
        self.systems
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.as_str())
            .unwrap_or(UNKNOWN_SYSTEM)
    }

    pub fn release_name(&self, id: Option<&str>) -> &'a str {
        match id {
            None => NO_RELEASE,
            Some(id) => self
                .releases
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.name.as_str())
                .unwrap_or(UNKNOWN_RELEASE),
        }
    }

    /// Build's system name, preferring the embedded copy when the system
    /// list does not know it
    pub fn build_system_name(&self, build: &'a Build) -> &'a str {
        match self.system_name(&build.system_id) {
            UNKNOWN_SYSTEM => build.embedded_system_name().unwrap_or(UNKNOWN_SYSTEM),
            name => name,
        }
    }

    pub fn build_release_name(&self, build: &'a Build) -> &'a str {
        match self.release_name(build.release_id.as_deref()) {
            UNKNOWN_RELEASE => build
                .release
                .as_ref()
                .map(|r| r.name.as_str())
                .filter(|n| !n.is_empty())
                .unwrap_or(UNKNOWN_RELEASE),
            name => name,
        }
    }
}

/// An entity a list view can search, filter and sort
pub trait Projectable {
    /// Column and direction used when the view names none
    const DEFAULT_SORT: (&'static str, SortOrder);

    /// Fields the free-text search looks at
    fn search_text<'a>(&'a self, ctx: &LookupContext<'a>) -> Vec<&'a str>;

    /// Sort key for `name`; unknown columns compare as empty text
    fn field(&self, name: &str, ctx: &LookupContext<'_>) -> FieldValue;

    /// Whether the entity passes the column filter `key = value`
    ///
    /// `None` means the key is not a filterable column for this entity.
    fn filter_value(&self, key: &str, value: &str, ctx: &LookupContext<'_>) -> Option<bool>;

    fn matches_type(&self, _filter: &TypeFilter) -> bool {
        true
    }
}

fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn date(value: &Option<DateTime<Utc>>) -> FieldValue {
    FieldValue::Date(*value)
}

fn empty() -> FieldValue {
    FieldValue::Text(String::new())
}

impl Projectable for Release {
    const DEFAULT_SORT: (&'static str, SortOrder) = ("created_at", SortOrder::Desc);

    fn search_text<'a>(&'a self, _ctx: &LookupContext<'a>) -> Vec<&'a str> {
        let mut fields = vec![self.name.as_str()];
        fields.extend(self.description.as_deref());
        fields
    }

    fn field(&self, name: &str, _ctx: &LookupContext<'_>) -> FieldValue {
        match name {
            "name" => FieldValue::text(&self.name),
            "status" => FieldValue::text(self.status.wire_name()),
            "type" => FieldValue::text(&self.release_type.to_string()),
            "release_date" => date(&self.release_date),
            "created_at" => date(&self.created_at),
            _ => empty(),
        }
    }

    fn filter_value(&self, key: &str, value: &str, _ctx: &LookupContext<'_>) -> Option<bool> {
        match key {
            "type" => Some(ReleaseType::parse(value) == Some(self.release_type)),
            "status" => Some(ReleaseStatus::parse(value) == Some(self.status)),
            _ => None,
        }
    }
}

impl Projectable for Build {
    const DEFAULT_SORT: (&'static str, SortOrder) = ("build_date", SortOrder::Desc);

    fn search_text<'a>(&'a self, ctx: &LookupContext<'a>) -> Vec<&'a str> {
        vec![
            ctx.build_system_name(self),
            self.version.as_str(),
            ctx.build_release_name(self),
        ]
    }

    fn field(&self, name: &str, ctx: &LookupContext<'_>) -> FieldValue {
        match name {
            "system" => FieldValue::text(ctx.build_system_name(self)),
            "version" => FieldValue::text(&self.version),
            "release" => FieldValue::text(ctx.build_release_name(self)),
            "build_date" => date(&self.build_date),
            "created_at" => date(&self.created_at),
            _ => empty(),
        }
    }

    fn filter_value(&self, key: &str, value: &str, _ctx: &LookupContext<'_>) -> Option<bool> {
        match key {
            "system" => Some(self.system_id == value.trim()),
            "release" => Some(match self.release_id.as_deref() {
                Some(id) => id == value.trim(),
                None => same(value, "none"),
            }),
            _ => None,
        }
    }
}

impl Projectable for System {
    const DEFAULT_SORT: (&'static str, SortOrder) = ("name", SortOrder::Asc);

    fn search_text<'a>(&'a self, _ctx: &LookupContext<'a>) -> Vec<&'a str> {
        let mut fields = vec![self.name.as_str()];
        fields.extend(self.description.as_deref());
        fields
    }

    fn field(&self, name: &str, _ctx: &LookupContext<'_>) -> FieldValue {
        match name {
            "name" => FieldValue::text(&self.name),
            "type" => FieldValue::text(self.system_type.wire_name()),
            "status" => FieldValue::text(&self.status.to_string()),
            "created_at" => date(&self.created_at),
            _ => empty(),
        }
    }

    fn filter_value(&self, key: &str, value: &str, _ctx: &LookupContext<'_>) -> Option<bool> {
        match key {
            "name" => Some(same(&self.name, value)),
            "type" => Some(SystemType::parse(value) == Some(self.system_type)),
            "status" => Some(SystemStatus::parse(value) == Some(self.status)),
            "parent" => Some(self.parent_id.as_deref() == Some(value.trim())),
            _ => None,
        }
    }

    fn matches_type(&self, filter: &TypeFilter) -> bool {
        filter.matches(self)
    }
}

impl Projectable for Environment {
    const DEFAULT_SORT: (&'static str, SortOrder) = ("name", SortOrder::Asc);

    fn search_text<'a>(&'a self, _ctx: &LookupContext<'a>) -> Vec<&'a str> {
        let mut fields = vec![self.name.as_str()];
        fields.extend(self.description.as_deref());
        fields.extend(self.url.as_deref());
        fields
    }

    fn field(&self, name: &str, _ctx: &LookupContext<'_>) -> FieldValue {
        match name {
            "name" => FieldValue::text(&self.name),
            "type" => FieldValue::text(&self.env_type.to_string()),
            "status" => FieldValue::text(&self.status.to_string()),
            "created_at" => date(&self.created_at),
            _ => empty(),
        }
    }

    fn filter_value(&self, key: &str, value: &str, _ctx: &LookupContext<'_>) -> Option<bool> {
        match key {
            "type" => Some(EnvironmentType::parse(value) == Some(self.env_type)),
            "status" => Some(EnvironmentStatus::parse(value) == Some(self.status)),
            "release" => Some(self.release_id == value.trim()),
            _ => None,
        }
    }
}

fn passes<T: Projectable>(item: &T, options: &ViewOptions, ctx: &LookupContext<'_>) -> bool {
    let term = options.search.trim().to_lowercase();
    if !term.is_empty()
        && !item
            .search_text(ctx)
            .iter()
            .any(|f| f.to_lowercase().contains(&term))
    {
        return false;
    }

    for (key, value) in &options.column_filters {
        if value.trim().is_empty() {
            continue;
        }
        match item.filter_value(key, value, ctx) {
            Some(true) => {}
            Some(false) => return false,
            None => log::debug!("ignoring unknown filter column '{}'", key),
        }
    }

    item.matches_type(&options.type_filter)
}

/// Applies search, column filters and type filter, then sorts
pub fn project<'a, T: Projectable>(
    items: &'a [T],
    options: &ViewOptions,
    ctx: &LookupContext<'_>,
) -> Vec<&'a T> {
    let (field, order) = match &options.sort_by {
        Some(field) => (field.as_str(), options.sort_order),
        None => T::DEFAULT_SORT,
    };

    let mut keyed: Vec<(FieldValue, &'a T)> = items
        .iter()
        .filter(|item| passes(*item, options, ctx))
        .map(|item| (item.field(field, ctx), item))
        .collect();

    // slice::sort_by is stable; reversing the comparator keeps ties in
    // input order for descending sorts too.
    keyed.sort_by(|(a, _), (b, _)| match order {
        SortOrder::Asc => a.compare(b),
        SortOrder::Desc => b.compare(a),
    });

    keyed.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NamedRef;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn release(id: &str, name: &str, date: Option<(i32, u32, u32)>) -> Release {
        Release {
            id: id.into(),
            name: name.into(),
            description: None,
            release_date: date.map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()),
            status: ReleaseStatus::Planned,
            release_type: ReleaseType::Minor,
            created_at: None,
            updated_at: None,
        }
    }

    fn system(id: &str, name: &str, system_type: SystemType, parent: Option<&str>) -> System {
        System {
            id: id.into(),
            name: name.into(),
            description: Some(format!("{} service", name)),
            system_type,
            status: SystemStatus::Active,
            parent_id: parent.map(Into::into),
            created_at: None,
            updated_at: None,
        }
    }

    fn build(id: &str, system_id: &str, version: &str, release_id: Option<&str>, day: u32) -> Build {
        Build {
            id: id.into(),
            system_id: system_id.into(),
            release_id: release_id.map(Into::into),
            version: version.into(),
            build_date: Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
            created_at: None,
            updated_at: None,
            system: None,
            release: None,
        }
    }

    fn ids<T>(items: &[&T], id: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|i| id(i).to_string()).collect()
    }

    #[test]
    fn test_sort_is_stable_in_both_directions() {
        let releases = vec![
            release("a", "Same", None),
            release("b", "Other", None),
            release("c", "same", None),
            release("d", "Same", None),
        ];
        let ctx = LookupContext::default();

        let asc = project(&releases, &ViewOptions::new().sort("name", SortOrder::Asc), &ctx);
        assert_eq!(ids(&asc, |r: &Release| r.id.as_str()), vec!["b", "a", "c", "d"]);

        let desc = project(&releases, &ViewOptions::new().sort("name", SortOrder::Desc), &ctx);
        assert_eq!(ids(&desc, |r: &Release| r.id.as_str()), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn test_missing_dates_sort_first() {
        let releases = vec![
            release("late", "Late", Some((2024, 6, 1))),
            release("none", "Undated", None),
            release("early", "Early", Some((2023, 1, 1))),
        ];
        let ctx = LookupContext::default();

        let asc = project(
            &releases,
            &ViewOptions::new().sort("release_date", SortOrder::Asc),
            &ctx,
        );
        assert_eq!(ids(&asc, |r: &Release| r.id.as_str()), vec!["none", "early", "late"]);

        let desc = project(
            &releases,
            &ViewOptions::new().sort("release_date", SortOrder::Desc),
            &ctx,
        );
        assert_eq!(ids(&desc, |r: &Release| r.id.as_str()), vec!["late", "early", "none"]);
    }

    #[test]
    fn test_unknown_sort_field_keeps_input_order() {
        let releases = vec![release("x", "X", None), release("y", "A", None)];
        let projected = project(
            &releases,
            &ViewOptions::new().sort("no_such_column", SortOrder::Desc),
            &LookupContext::default(),
        );
        assert_eq!(ids(&projected, |r: &Release| r.id.as_str()), vec!["x", "y"]);
    }

    #[test]
    fn test_build_search_uses_resolved_names() {
        let systems = vec![system("s1", "Payments", SystemType::System, None)];
        let releases = vec![release("r1", "Spring", None)];
        let builds = vec![
            build("b1", "s1", "1.0.0", Some("r1"), 1),
            build("b2", "s-gone", "2.0.0", None, 2),
        ];
        let ctx = LookupContext::new(&systems, &releases);

        let by_system = project(&builds, &ViewOptions::new().search("PAY"), &ctx);
        assert_eq!(ids(&by_system, |b: &Build| b.id.as_str()), vec!["b1"]);

        let by_release = project(&builds, &ViewOptions::new().search("spring"), &ctx);
        assert_eq!(ids(&by_release, |b: &Build| b.id.as_str()), vec!["b1"]);

        let by_placeholder = project(&builds, &ViewOptions::new().search("no release"), &ctx);
        assert_eq!(ids(&by_placeholder, |b: &Build| b.id.as_str()), vec!["b2"]);

        assert_eq!(ctx.system_name("s-gone"), UNKNOWN_SYSTEM);
        assert_eq!(ctx.release_name(Some("r-gone")), UNKNOWN_RELEASE);
    }

    #[test]
    fn test_builds_default_to_newest_first() {
        let builds = vec![
            build("old", "s1", "1.0.0", None, 1),
            build("new", "s1", "1.1.0", None, 9),
            build("mid", "s1", "1.0.5", None, 5),
        ];
        let projected = project(&builds, &ViewOptions::new(), &LookupContext::default());
        assert_eq!(ids(&projected, |b: &Build| b.id.as_str()), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_build_column_filters() {
        let builds = vec![
            build("b1", "s1", "1.0.0", Some("r1"), 1),
            build("b2", "s2", "1.0.0", None, 2),
            build("b3", "s1", "1.1.0", None, 3),
        ];
        let ctx = LookupContext::default();

        let s1 = project(&builds, &ViewOptions::new().filter("system", "s1"), &ctx);
        assert_eq!(ids(&s1, |b: &Build| b.id.as_str()), vec!["b3", "b1"]);

        let loose = project(
            &builds,
            &ViewOptions::new().filter("release", "none").filter("system", "s1"),
            &ctx,
        );
        assert_eq!(ids(&loose, |b: &Build| b.id.as_str()), vec!["b3"]);

        let ignored = project(&builds, &ViewOptions::new().filter("system", ""), &ctx);
        assert_eq!(ignored.len(), 3);
    }

    #[test]
    fn test_system_type_filter_defaults_to_roots() {
        let systems = vec![
            system("p", "Platform", SystemType::ParentSystem, None),
            system("c", "Auth", SystemType::Subsystem, Some("p")),
            system("s", "Billing", SystemType::System, None),
        ];
        let ctx = LookupContext::default();

        let roots = project(&systems, &ViewOptions::new(), &ctx);
        assert_eq!(ids(&roots, |s: &System| s.id.as_str()), vec!["s", "p"]);

        let all = project(&systems, &ViewOptions::new().type_filter(TypeFilter::All), &ctx);
        assert_eq!(all.len(), 3);

        let subs = project(
            &systems,
            &ViewOptions::new().type_filter(TypeFilter::parse("subsystems").unwrap()),
            &ctx,
        );
        assert_eq!(ids(&subs, |s: &System| s.id.as_str()), vec!["c"]);

        let by_column = project(
            &systems,
            &ViewOptions::new()
                .type_filter(TypeFilter::All)
                .filter("type", "Parent System"),
            &ctx,
        );
        assert_eq!(ids(&by_column, |s: &System| s.id.as_str()), vec!["p"]);
    }

    #[test]
    fn test_build_release_sort_uses_embedded_name() {
        let releases = vec![release("r1", "Midsummer", None)];
        let mut orphan = build("b1", "s1", "1.0.0", Some("r-gone"), 1);
        orphan.release = Some(NamedRef {
            id: "r-gone".into(),
            name: "Autumn".into(),
        });
        let builds = vec![
            build("b2", "s1", "1.1.0", Some("r1"), 2),
            orphan,
            build("b3", "s1", "1.2.0", None, 3),
        ];
        let ctx = LookupContext::new(&[], &releases);

        // Autumn < Midsummer < No Release
        let sorted = project(&builds, &ViewOptions::new().sort("release", SortOrder::Asc), &ctx);
        assert_eq!(ids(&sorted, |b: &Build| b.id.as_str()), vec!["b1", "b2", "b3"]);

        let found = project(&builds, &ViewOptions::new().search("autumn"), &ctx);
        assert_eq!(ids(&found, |b: &Build| b.id.as_str()), vec!["b1"]);
    }

    fn environment(id: &str, name: &str, env_type: EnvironmentType, release_id: &str) -> Environment {
        Environment {
            id: id.into(),
            name: name.into(),
            env_type,
            status: EnvironmentStatus::Active,
            url: Some(format!("https://{}.example.com", id)),
            description: None,
            release_id: release_id.into(),
            environment_group_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_environment_filters_and_search() {
        let environments = vec![
            environment("prod-eu", "Production EU", EnvironmentType::Prod, "r2"),
            environment("qa", "QA", EnvironmentType::Staging, "r1"),
            environment("dev", "Dev box", EnvironmentType::Dev, "r1"),
        ];
        let ctx = LookupContext::default();

        let by_name = project(&environments, &ViewOptions::new(), &ctx);
        assert_eq!(
            ids(&by_name, |e: &Environment| e.id.as_str()),
            vec!["dev", "prod-eu", "qa"]
        );

        let in_r1 = project(&environments, &ViewOptions::new().filter("release", "r1"), &ctx);
        assert_eq!(ids(&in_r1, |e: &Environment| e.id.as_str()), vec!["dev", "qa"]);

        let by_url = project(&environments, &ViewOptions::new().search("prod-eu.example"), &ctx);
        assert_eq!(ids(&by_url, |e: &Environment| e.id.as_str()), vec!["prod-eu"]);

        let staging = project(
            &environments,
            &ViewOptions::new().filter("type", "stage").sort("name", SortOrder::Desc),
            &ctx,
        );
        assert_eq!(ids(&staging, |e: &Environment| e.id.as_str()), vec!["qa"]);

        let by_type = project(&environments, &ViewOptions::new().sort("type", SortOrder::Desc), &ctx);
        assert_eq!(
            ids(&by_type, |e: &Environment| e.id.as_str()),
            vec!["qa", "prod-eu", "dev"]
        );
    }

    #[test]
    fn test_projection_does_not_mutate_input() {
        let releases = vec![release("b", "B", None), release("a", "A", None)];
        let before = releases.clone();
        let _ = project(&releases, &ViewOptions::new().sort("name", SortOrder::Asc), &LookupContext::default());
        assert_eq!(releases, before);
    }
}
