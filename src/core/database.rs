use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::models::{Revision, RevisionId, Wiring};

/// The installed universe: revisions, which of them are current, and committed wirings.
#[derive(Debug, Default, Clone)]
pub struct ModuleDatabase {
    revisions: IndexMap<RevisionId, Arc<Revision>>,
    current: IndexMap<String, RevisionId>,
    wirings: HashMap<RevisionId, Arc<Wiring>>,
    removal_pending: IndexSet<RevisionId>,
    next_id: u64,
    generation: u64,
}

impl ModuleDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revision(&self, id: RevisionId) -> Option<&Arc<Revision>> {
        self.revisions.get(&id)
    }

    pub fn revisions(&self) -> impl Iterator<Item = &Arc<Revision>> {
        self.revisions.values()
    }

    pub fn current_revision(&self, location: &str) -> Option<RevisionId> {
        self.current.get(location).copied()
    }

    pub fn current_revisions(&self) -> impl Iterator<Item = &Arc<Revision>> {
        self.current
            .values()
            .filter_map(|id| self.revisions.get(id))
    }

    pub fn is_current(&self, id: RevisionId) -> bool {
        self.revisions
            .get(&id)
            .is_some_and(|r| self.current.get(&r.location) == Some(&id))
    }

    pub fn wiring(&self, id: RevisionId) -> Option<&Arc<Wiring>> {
        self.wirings.get(&id)
    }

    pub fn wirings(&self) -> impl Iterator<Item = &Arc<Wiring>> {
        self.wirings.values()
    }

    pub fn is_resolved(&self, id: RevisionId) -> bool {
        self.wirings.contains_key(&id)
    }

    pub fn is_removal_pending(&self, id: RevisionId) -> bool {
        self.removal_pending.contains(&id)
    }

    pub fn removal_pending(&self) -> impl Iterator<Item = RevisionId> + '_ {
        self.removal_pending.iter().copied()
    }

    pub fn unresolved_current(&self) -> impl Iterator<Item = &Arc<Revision>> {
        self.current_revisions()
            .filter(|r| !self.wirings.contains_key(&r.id))
    }

    /// Revisions whose committed wiring references `provider`.
    pub fn dependents_of(&self, provider: RevisionId) -> Vec<RevisionId> {
        let mut dependents: Vec<RevisionId> = self
            .wirings
            .values()
            .filter(|w| w.revision != provider && w.depends_on(provider))
            .map(|w| w.revision)
            .collect();
        dependents.sort();
        dependents
    }

    /// `seeds` plus everything that transitively depends on them, plus attached fragments and their hosts.
    pub fn dependency_closure(&self, seeds: &[RevisionId]) -> BTreeSet<RevisionId> {
        let mut closure = BTreeSet::new();
        let mut queue: Vec<RevisionId> = seeds.to_vec();
        while let Some(id) = queue.pop() {
            if !closure.insert(id) {
                continue;
            }
            queue.extend(self.dependents_of(id));
            if let Some(wiring) = self.wirings.get(&id) {
                queue.extend(wiring.fragments.iter().copied());
            }
            // A fragment's host is found through the host wire in its own wiring.
            if let Some(revision) = self.revisions.get(&id) {
                if revision.is_fragment {
                    if let Some(wiring) = self.wirings.get(&id) {
                        queue.extend(wiring.required_wires.iter().map(|w| w.provider));
                    }
                }
            }
        }
        closure
    }

    pub(crate) fn allocate_id(&mut self) -> RevisionId {
        self.next_id += 1;
        RevisionId(self.next_id)
    }

    pub(crate) fn insert(&mut self, revision: Arc<Revision>) -> Option<RevisionId> {
        self.generation += 1;
        let previous = self
            .current
            .insert(revision.location.clone(), revision.id);
        self.revisions.insert(revision.id, revision);
        previous
    }

    /// Drops `location` from the current set, returning the revision that was current.
    pub(crate) fn remove_current(&mut self, location: &str) -> Option<RevisionId> {
        self.generation += 1;
        self.current.shift_remove(location)
    }

    pub(crate) fn mark_removal_pending(&mut self, id: RevisionId) {
        self.generation += 1;
        self.removal_pending.insert(id);
    }

    /// Forgets a revision entirely, with its wiring.
    pub(crate) fn discard(&mut self, id: RevisionId) -> Option<Arc<Revision>> {
        self.generation += 1;
        self.wirings.remove(&id);
        self.removal_pending.shift_remove(&id);
        self.revisions.shift_remove(&id)
    }

    pub(crate) fn commit_wiring(&mut self, wiring: Wiring) {
        self.generation += 1;
        self.wirings.insert(wiring.revision, Arc::new(wiring));
    }

    pub(crate) fn unresolve(&mut self, id: RevisionId) -> Option<Arc<Wiring>> {
        self.generation += 1;
        self.wirings.remove(&id)
    }
}
