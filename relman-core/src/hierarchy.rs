//! System hierarchy
//!
//! Systems form at most two levels: parent systems own subsystems, and
//! standalone systems own nothing. Stored data may still contain cycles or
//! dangling parents, so traversal never assumes the shape holds.

use std::collections::{HashSet, VecDeque};

use crate::models::{System, SystemType};

/// Systems shown at the top level: everything that is not a subsystem
pub fn root_systems(all: &[System]) -> Vec<&System> {
    all.iter().filter(|s| !s.is_subsystem()).collect()
}

/// Direct children of `parent_id`, in input order
pub fn subsystems_of<'a>(parent_id: &str, all: &'a [System]) -> Vec<&'a System> {
    all.iter()
        .filter(|s| s.parent_id.as_deref() == Some(parent_id))
        .collect()
}

/// Ids of every system below `id`
///
/// Terminates on cyclic data; `id` itself is never included.
pub fn descendants_of(id: &str, all: &[System]) -> HashSet<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([id]);

    while let Some(current) = queue.pop_front() {
        for child in all
            .iter()
            .filter(|s| s.parent_id.as_deref() == Some(current))
        {
            if child.id != id && visited.insert(child.id.clone()) {
                queue.push_back(child.id.as_str());
            }
        }
    }

    visited
}

/// Systems that may be chosen as the parent of `current`
///
/// Only parent systems qualify; `current` and its descendants are excluded.
pub fn available_parents<'a>(current: Option<&str>, all: &'a [System]) -> Vec<&'a System> {
    let excluded = current
        .map(|id| descendants_of(id, all))
        .unwrap_or_default();

    all.iter()
        .filter(|s| s.system_type == SystemType::ParentSystem)
        .filter(|s| Some(s.id.as_str()) != current)
        .filter(|s| !excluded.contains(&s.id))
        .collect()
}

/// Name of the parent of `system`, if it has one that can be found
pub fn parent_name<'a>(system: &System, all: &'a [System]) -> Option<&'a str> {
    let parent_id = system.parent_id.as_deref()?;
    all.iter()
        .find(|s| s.id == parent_id)
        .map(|s| s.name.as_str())
}

/// A top-level system with its direct subsystems
#[derive(Debug, Clone, PartialEq)]
pub struct SystemNode<'a> {
    pub system: &'a System,
    pub children: Vec<&'a System>,
}

/// Two-level tree in input order
///
/// Subsystems whose parent is missing from `all` are listed as roots.
pub fn system_tree(all: &[System]) -> Vec<SystemNode<'_>> {
    let ids: HashSet<&str> = all.iter().map(|s| s.id.as_str()).collect();
    let is_orphan = |s: &System| {
        s.is_subsystem()
            && s
                .parent_id
                .as_deref()
                .map_or(true, |p| !ids.contains(p) || p == s.id)
    };

    all.iter()
        .filter(|s| !s.is_subsystem() || is_orphan(*s))
        .map(|system| SystemNode {
            system,
            children: if system.is_subsystem() {
                Vec::new()
            } else {
                subsystems_of(&system.id, all)
            },
        })
        .collect()
}

/// Number of systems per category, for list headers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemCounts {
    pub root: usize,
    pub parent_systems: usize,
    pub systems: usize,
    pub subsystems: usize,
}

impl SystemCounts {
    pub fn total(&self) -> usize {
        self.parent_systems + self.systems + self.subsystems
    }
}

pub fn system_counts(all: &[System]) -> SystemCounts {
    all.iter().fold(SystemCounts::default(), |mut counts, s| {
        match s.system_type {
            SystemType::ParentSystem => counts.parent_systems += 1,
            SystemType::System => counts.systems += 1,
            SystemType::Subsystem => counts.subsystems += 1,
        }
        if !s.is_subsystem() {
            counts.root += 1;
        }
        counts
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SystemStatus;
    use pretty_assertions::assert_eq;

    fn system(id: &str, system_type: SystemType, parent: Option<&str>) -> System {
        System {
            id: id.into(),
            name: format!("{}-name", id),
            description: None,
            system_type,
            status: SystemStatus::Active,
            parent_id: parent.map(Into::into),
            created_at: None,
            updated_at: None,
        }
    }

    fn ids(systems: &[&System]) -> Vec<String> {
        systems.iter().map(|s| s.id.clone()).collect()
    }

    fn sample() -> Vec<System> {
        vec![
            system("p1", SystemType::ParentSystem, None),
            system("a", SystemType::Subsystem, Some("p1")),
            system("s1", SystemType::System, None),
            system("p2", SystemType::ParentSystem, None),
            system("b", SystemType::Subsystem, Some("p1")),
            system("c", SystemType::Subsystem, Some("p2")),
        ]
    }

    #[test]
    fn test_roots_and_subsystems_keep_input_order() {
        let all = sample();
        assert_eq!(ids(&root_systems(&all)), vec!["p1", "s1", "p2"]);
        assert_eq!(ids(&subsystems_of("p1", &all)), vec!["a", "b"]);
        assert!(subsystems_of("s1", &all).is_empty());
    }

    #[test]
    fn test_available_parents_are_parent_systems_only() {
        let all = sample();
        assert_eq!(ids(&available_parents(None, &all)), vec!["p1", "p2"]);
        assert_eq!(ids(&available_parents(Some("p1"), &all)), vec!["p2"]);
    }

    #[test]
    fn test_descendants_terminate_on_cycles() {
        let all = vec![
            system("x", SystemType::ParentSystem, Some("y")),
            system("y", SystemType::ParentSystem, Some("x")),
            system("z", SystemType::Subsystem, Some("y")),
        ];

        let below_x = descendants_of("x", &all);
        assert_eq!(below_x.len(), 2);
        assert!(below_x.contains("y"));
        assert!(below_x.contains("z"));
        assert!(!below_x.contains("x"));

        assert!(available_parents(Some("x"), &all).is_empty());
    }

    #[test]
    fn test_parent_name_lookup() {
        let all = sample();
        assert_eq!(parent_name(&all[1], &all), Some("p1-name"));
        assert_eq!(parent_name(&all[2], &all), None);

        let orphan = system("o", SystemType::Subsystem, Some("gone"));
        assert_eq!(parent_name(&orphan, &all), None);
    }

    #[test]
    fn test_tree_groups_children_and_surfaces_orphans() {
        let mut all = sample();
        all.push(system("o", SystemType::Subsystem, Some("gone")));

        let tree = system_tree(&all);
        let shape: Vec<(String, Vec<String>)> = tree
            .iter()
            .map(|n| (n.system.id.clone(), ids(&n.children)))
            .collect();

        assert_eq!(
            shape,
            vec![
                ("p1".to_string(), vec!["a".to_string(), "b".to_string()]),
                ("s1".to_string(), vec![]),
                ("p2".to_string(), vec!["c".to_string()]),
                ("o".to_string(), vec![]),
            ]
        );
    }

    #[test]
    fn test_counts_per_type() {
        let counts = system_counts(&sample());
        assert_eq!(
            counts,
            SystemCounts {
                root: 3,
                parent_systems: 2,
                systems: 1,
                subsystems: 3,
            }
        );
        assert_eq!(counts.total(), 6);
    }
}
