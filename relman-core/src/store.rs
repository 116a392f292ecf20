//! Entity Store
//!
//! Holds the last fetched copy of each collection. Every refresh takes a
//! [`RefreshTicket`]; a response is only applied while its ticket is still
//! current, so a slow fetch that lands after an invalidation is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::backend::{self, Backend};
use crate::models::{Build, Environment, EnvironmentGroup, Release, System};

/// The collections the store tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Releases,
    Builds,
    Systems,
    Environments,
    EnvironmentGroups,
}

impl EntityKind {
    pub fn all() -> [EntityKind; 5] {
        [
            EntityKind::Releases,
            EntityKind::Builds,
            EntityKind::Systems,
            EntityKind::Environments,
            EntityKind::EnvironmentGroups,
        ]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Releases => write!(f, "releases"),
            EntityKind::Builds => write!(f, "builds"),
            EntityKind::Systems => write!(f, "systems"),
            EntityKind::Environments => write!(f, "environments"),
            EntityKind::EnvironmentGroups => write!(f, "environment groups"),
        }
    }
}

/// A full collection as returned by one list call
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    Releases(Vec<Release>),
    Builds(Vec<Build>),
    Systems(Vec<System>),
    Environments(Vec<Environment>),
    EnvironmentGroups(Vec<EnvironmentGroup>),
}

impl Collection {
    pub fn kind(&self) -> EntityKind {
        match self {
            Collection::Releases(_) => EntityKind::Releases,
            Collection::Builds(_) => EntityKind::Builds,
            Collection::Systems(_) => EntityKind::Systems,
            Collection::Environments(_) => EntityKind::Environments,
            Collection::EnvironmentGroups(_) => EntityKind::EnvironmentGroups,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Releases(v) => v.len(),
            Collection::Builds(v) => v.len(),
            Collection::Systems(v) => v.len(),
            Collection::Environments(v) => v.len(),
            Collection::EnvironmentGroups(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_releases(self) -> Vec<Release> {
        match self {
            Collection::Releases(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn into_builds(self) -> Vec<Build> {
        match self {
            Collection::Builds(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn into_systems(self) -> Vec<System> {
        match self {
            Collection::Systems(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn into_environments(self) -> Vec<Environment> {
        match self {
            Collection::Environments(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn into_environment_groups(self) -> Vec<EnvironmentGroup> {
        match self {
            Collection::EnvironmentGroups(v) => v,
            _ => Vec::new(),
        }
    }
}

/// Proof that a refresh was started at a given generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    kind: EntityKind,
    generation: u64,
}

impl RefreshTicket {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }
}

/// Fetches one collection in full
pub fn fetch_collection<B: Backend + ?Sized>(
    backend: &B,
    kind: EntityKind,
) -> backend::Result<Collection> {
    log::debug!("fetching {} from {}", kind, backend.location());
    Ok(match kind {
        EntityKind::Releases => Collection::Releases(backend.list_releases()?),
        EntityKind::Builds => Collection::Builds(backend.list_builds()?),
        EntityKind::Systems => Collection::Systems(backend.list_systems()?),
        EntityKind::Environments => Collection::Environments(backend.list_environments()?),
        EntityKind::EnvironmentGroups => {
            Collection::EnvironmentGroups(backend.list_environment_groups()?)
        }
    })
}

/// Locks a shared store
///
/// The store only caches, so a panic mid-update cannot leave it unusable.
pub fn lock(store: &Mutex<EntityStore>) -> MutexGuard<'_, EntityStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fetches one collection in full and applies it if its ticket survives
///
/// The lock is held only to take the ticket and to apply the response, so
/// an invalidation can land while the fetch is in flight. The fetched
/// collection is returned to the caller even when the store drops it.
pub fn load<B: Backend + ?Sized>(
    store: &Mutex<EntityStore>,
    backend: &B,
    kind: EntityKind,
) -> backend::Result<Collection> {
    let ticket = lock(store).begin_refresh(kind);
    let collection = fetch_collection(backend, kind)?;
    lock(store).apply(ticket, collection.clone());
    Ok(collection)
}

#[derive(Debug, Default)]
pub struct EntityStore {
    collections: HashMap<EntityKind, Collection>,
    generations: HashMap<EntityKind, u64>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn generation(&self, kind: EntityKind) -> u64 {
        self.generations.get(&kind).copied().unwrap_or(0)
    }

    fn bump(&mut self, kind: EntityKind) -> u64 {
        let generation = self.generations.entry(kind).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Starts a refresh; any ticket issued earlier for `kind` goes stale
    pub fn begin_refresh(&mut self, kind: EntityKind) -> RefreshTicket {
        RefreshTicket {
            kind,
            generation: self.bump(kind),
        }
    }

    pub fn is_current(&self, ticket: &RefreshTicket) -> bool {
        self.generation(ticket.kind) == ticket.generation
    }

    /// Stores `collection` if `ticket` is still current
    ///
    /// Returns false, leaving the store untouched, for a stale ticket or a
    /// collection of the wrong kind.
    pub fn apply(&mut self, ticket: RefreshTicket, collection: Collection) -> bool {
        if collection.kind() != ticket.kind {
            log::debug!(
                "ignoring {} response for a {} refresh",
                collection.kind(),
                ticket.kind
            );
            return false;
        }
        if !self.is_current(&ticket) {
            log::debug!(
                "discarding stale {} response (generation {}, current {})",
                ticket.kind,
                ticket.generation,
                self.generation(ticket.kind)
            );
            return false;
        }
        self.collections.insert(ticket.kind, collection);
        true
    }

    /// Drops the cached collection and orphans every in-flight refresh
    pub fn invalidate(&mut self, kind: EntityKind) {
        self.bump(kind);
        self.collections.remove(&kind);
    }

    pub fn invalidate_all(&mut self) {
        for kind in EntityKind::all() {
            self.invalidate(kind);
        }
    }

    pub fn is_loaded(&self, kind: EntityKind) -> bool {
        self.collections.contains_key(&kind)
    }

    pub fn get(&self, kind: EntityKind) -> Option<&Collection> {
        self.collections.get(&kind)
    }

    pub fn releases(&self) -> &[Release] {
        match self.collections.get(&EntityKind::Releases) {
            Some(Collection::Releases(v)) => v,
            _ => &[],
        }
    }

    pub fn builds(&self) -> &[Build] {
        match self.collections.get(&EntityKind::Builds) {
            Some(Collection::Builds(v)) => v,
            _ => &[],
        }
    }

    pub fn systems(&self) -> &[System] {
        match self.collections.get(&EntityKind::Systems) {
            Some(Collection::Systems(v)) => v,
            _ => &[],
        }
    }

    pub fn environments(&self) -> &[Environment] {
        match self.collections.get(&EntityKind::Environments) {
            Some(Collection::Environments(v)) => v,
            _ => &[],
        }
    }

    pub fn environment_groups(&self) -> &[EnvironmentGroup] {
        match self.collections.get(&EntityKind::EnvironmentGroups) {
            Some(Collection::EnvironmentGroups(v)) => v,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::models::{ReleaseDraft, SystemDraft, SystemType};

    #[test]
    fn test_load_fills_collection() {
        let backend = LocalBackend::in_memory();
        backend
            .create_system(&SystemDraft::new("Core", SystemType::System))
            .unwrap();

        let store = Mutex::new(EntityStore::new());
        assert!(!lock(&store).is_loaded(EntityKind::Systems));
        let systems = load(&store, &backend, EntityKind::Systems).unwrap();
        assert_eq!(systems.len(), 1);

        let store = lock(&store);
        assert_eq!(store.systems().len(), 1);
        assert!(store.releases().is_empty());
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut store = EntityStore::new();
        let stale = store.begin_refresh(EntityKind::Releases);
        let fresh = store.begin_refresh(EntityKind::Releases);

        assert!(store.apply(fresh, Collection::Releases(Vec::new())));
        assert!(!store.apply(stale, Collection::Releases(Vec::new())));
    }

    #[test]
    fn test_invalidate_discards_in_flight_response() {
        let backend = LocalBackend::in_memory();
        let release = backend.create_release(&ReleaseDraft::new("R1")).unwrap();

        let mut store = EntityStore::new();
        let ticket = store.begin_refresh(EntityKind::Releases);
        let response = fetch_collection(&backend, EntityKind::Releases).unwrap();

        store.invalidate(EntityKind::Releases);
        assert!(!store.apply(ticket, response));
        assert!(!store.is_loaded(EntityKind::Releases));

        let store = Mutex::new(store);
        load(&store, &backend, EntityKind::Releases).unwrap();
        assert_eq!(lock(&store).releases()[0].id, release.id);
    }

    #[test]
    fn test_invalidate_all_orphans_every_ticket() {
        let mut store = EntityStore::new();
        let tickets: Vec<RefreshTicket> = EntityKind::all()
            .into_iter()
            .map(|kind| store.begin_refresh(kind))
            .collect();

        store.invalidate_all();
        assert!(tickets.iter().all(|t| !store.is_current(t)));
    }

    #[test]
    fn test_collection_accessors_match_kind() {
        let releases = Collection::Releases(Vec::new());
        assert_eq!(releases.kind(), EntityKind::Releases);
        assert!(releases.into_builds().is_empty());
        assert_eq!(
            Collection::EnvironmentGroups(Vec::new()).kind(),
            EntityKind::EnvironmentGroups
        );
    }

    #[test]
    fn test_tickets_are_per_kind() {
        let mut store = EntityStore::new();
        let builds = store.begin_refresh(EntityKind::Builds);
        store.invalidate(EntityKind::Systems);

        assert!(store.is_current(&builds));
        assert!(!store.apply(builds, Collection::Systems(Vec::new())));
        assert!(store.apply(builds, Collection::Builds(Vec::new())));
    }
}
