use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, trace};

use crate::config::ResolverConfig;
use crate::core::database::ModuleDatabase;
use crate::core::hooks::HookChain;
use crate::core::index::{Candidate, CandidateIndex};
use crate::core::namespace::Namespace;
use crate::core::report::{EntryData, EntryType, ReportEntry, ResolutionReport, UnsatisfiedRequirement};
use crate::models::{
    Capability, CapabilityKey, Cardinality, Requirement, Resolution as ResolutionMode, Revision, RevisionId,
    Wire, Wiring, HOST_NAMESPACE, PACKAGE_NAMESPACE,
};

use super::uses::Conflict;
use super::{Resolution, ResolveError};

#[derive(Debug, Clone)]
pub(super) enum Exclusion {
    FilteredByHook,
    Singleton {
        selected: RevisionId,
        rejected: Vec<RevisionId>,
    },
}

#[derive(Debug, Clone)]
pub(super) enum Failure {
    /// Mandatory slots left without a live candidate when the revision failed.
    Requirements(Vec<usize>),
    Uses {
        package: String,
        providers: Vec<RevisionId>,
    },
    /// Withdrawn because another trigger of a mandatory call failed.
    Rollback,
}

pub(super) struct Node {
    pub(super) revision: Arc<Revision>,
    pub(super) slots: Vec<usize>,
    pub(super) failure: Option<Failure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Substitution {
    /// Import from another provider; the own export is withdrawn.
    External,
    /// Keep the own export and wire to it.
    Internal,
}

/// One requirement to bind, on behalf of the revision whose wiring will carry the wire.
pub(super) struct Slot {
    pub(super) requirer: RevisionId,
    /// Differs from `requirer` for fragment requirements merged into a host.
    pub(super) declared_by: RevisionId,
    pub(super) requirement: Arc<Requirement>,
    pub(super) candidates: Vec<Candidate>,
    /// Every capability the index matched, before exclusions and hooks.
    pub(super) matching: Vec<Arc<Capability>>,
    pub(super) hook_removed: bool,
    /// Candidate positions withdrawn by uses backtracking.
    pub(super) rejected: HashSet<usize>,
    pub(super) substitution: Option<Substitution>,
    pub(super) conflict: Option<(String, Vec<RevisionId>)>,
}

#[derive(Debug, Clone)]
pub(super) struct Binding {
    pub(super) chosen: Vec<usize>,
    pub(super) sequence: u64,
}

struct HostSearch {
    matching: Vec<Arc<Capability>>,
    hook_removed: bool,
}

pub(super) struct Session<'a> {
    pub(super) db: &'a ModuleDatabase,
    index: &'a CandidateIndex,
    config: &'a ResolverConfig,
    hooks: &'a mut HookChain,
    triggers: Vec<RevisionId>,
    mandatory: bool,
    excluded: IndexMap<RevisionId, Exclusion>,
    /// Excluded revisions that showed up as a candidate owner.
    referenced: HashSet<RevisionId>,
    host_of: HashMap<RevisionId, RevisionId>,
    pub(super) fragments_of: HashMap<RevisionId, Vec<RevisionId>>,
    unattached: HashMap<RevisionId, HostSearch>,
    pub(super) nodes: IndexMap<RevisionId, Node>,
    pub(super) slots: Vec<Slot>,
    declared: HashMap<RevisionId, Vec<usize>>,
    /// The binding table: one entry per slot.
    pub(super) bindings: Vec<Option<Binding>>,
    pub(super) substituted: HashSet<CapabilityKey>,
    sequence: u64,
    backtracks: usize,
}

impl<'a> Session<'a> {
    pub(super) fn new(
        db: &'a ModuleDatabase,
        index: &'a CandidateIndex,
        config: &'a ResolverConfig,
        hooks: &'a mut HookChain,
        triggers: Vec<RevisionId>,
        mandatory: bool,
    ) -> Self {
        Self {
            db,
            index,
            config,
            hooks,
            triggers,
            mandatory,
            excluded: IndexMap::new(),
            referenced: HashSet::new(),
            host_of: HashMap::new(),
            fragments_of: HashMap::new(),
            unattached: HashMap::new(),
            nodes: IndexMap::new(),
            slots: Vec::new(),
            declared: HashMap::new(),
            bindings: Vec::new(),
            substituted: HashSet::new(),
            sequence: 0,
            backtracks: 0,
        }
    }

    pub(super) fn run(mut self) -> Result<Resolution, ResolveError> {
        let universe: Vec<Arc<Revision>> = self.db.unresolved_current().cloned().collect();
        debug!(
            universe = universe.len(),
            triggers = self.triggers.len(),
            mandatory = self.mandatory,
            "starting resolution"
        );

        let resolvable = self.filter_resolvable(&universe);
        let reachable = self.reachable(&resolvable)?;
        self.select_singletons(&resolvable, &reachable);
        self.attach_fragments(&resolvable)?;
        self.populate()?;
        self.settle();

        if self.mandatory && self.trigger_failed() {
            debug!("mandatory trigger failed; rolling back all triggers");
            self.roll_back();
            self.settle();
        }

        Ok(self.finish())
    }

    fn filter_resolvable(&mut self, universe: &[Arc<Revision>]) -> Vec<Arc<Revision>> {
        let mut resolvable = universe.to_vec();
        self.hooks.filter_resolvable(&mut resolvable);
        let kept: HashSet<RevisionId> = resolvable.iter().map(|r| r.id).collect();
        for revision in universe.iter().filter(|r| !kept.contains(&r.id)) {
            debug!(revision = %revision, "excluded by resolver hook");
            self.excluded.insert(revision.id, Exclusion::FilteredByHook);
        }
        resolvable
    }

    /// Revisions this call could pull in from the triggers, fragments included.
    fn reachable(&self, resolvable: &[Arc<Revision>]) -> Result<HashSet<RevisionId>, ResolveError> {
        let live: HashMap<RevisionId, &Arc<Revision>> =
            resolvable.iter().map(|r| (r.id, r)).collect();
        let mut reached = HashSet::new();
        let mut queue: VecDeque<RevisionId> = self
            .triggers
            .iter()
            .copied()
            .filter(|id| live.contains_key(id))
            .collect();
        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            let Some(revision) = live.get(&id) else {
                continue;
            };
            for requirement in revision
                .requirements
                .iter()
                .filter(|r| r.is_effective() && r.resolution() != ResolutionMode::Dynamic)
            {
                for candidate in self.index.find_providers(requirement)? {
                    if !candidate.resolved && live.contains_key(&candidate.provider) {
                        queue.push_back(candidate.provider);
                    }
                }
            }
            if revision.is_fragment {
                continue;
            }
            for fragment in resolvable
                .iter()
                .filter(|r| r.is_fragment && !reached.contains(&r.id))
            {
                let Some(requirement) = fragment.host_requirement() else {
                    continue;
                };
                if self
                    .index
                    .find_providers(requirement)?
                    .iter()
                    .any(|c| c.provider == id)
                {
                    queue.push_back(fragment.id);
                }
            }
        }
        Ok(reached)
    }

    fn select_singletons(&mut self, resolvable: &[Arc<Revision>], reachable: &HashSet<RevisionId>) {
        let mut groups: IndexMap<String, Vec<(Arc<Revision>, bool)>> = IndexMap::new();
        for revision in self.db.revisions() {
            if revision.is_singleton && self.db.is_resolved(revision.id) {
                groups
                    .entry(revision.symbolic_name.clone())
                    .or_default()
                    .push((revision.clone(), true));
            }
        }
        for revision in resolvable
            .iter()
            .filter(|r| r.is_singleton && reachable.contains(&r.id))
        {
            groups
                .entry(revision.symbolic_name.clone())
                .or_default()
                .push((revision.clone(), false));
        }

        for (name, mut members) in groups {
            if members.len() < 2 || members.iter().all(|(_, resolved)| *resolved) {
                continue;
            }
            // Resolved members first, then highest version, then install order.
            members.sort_by(|(a, a_resolved), (b, b_resolved)| {
                b_resolved
                    .cmp(a_resolved)
                    .then_with(|| b.version.cmp(&a.version))
                    .then(a.id.cmp(&b.id))
            });

            let mut selected: Vec<RevisionId> = members
                .iter()
                .filter(|(_, resolved)| *resolved)
                .map(|(r, _)| r.id)
                .collect();
            let mut losers = Vec::new();
            for (member, resolved) in &members {
                if *resolved {
                    continue;
                }
                let Some(identity) = member.identity() else {
                    continue;
                };
                let mut collisions: Vec<Arc<Capability>> = members
                    .iter()
                    .filter(|(other, _)| other.id != member.id)
                    .filter_map(|(other, _)| other.identity().cloned())
                    .collect();
                self.hooks.filter_singleton_collisions(identity, &mut collisions);
                match collisions.iter().find(|c| selected.contains(&c.owner)) {
                    Some(winner) => losers.push((member.id, winner.owner)),
                    None => selected.push(member.id),
                }
            }

            let rejected: Vec<RevisionId> = losers.iter().map(|(loser, _)| *loser).collect();
            for (loser, winner) in losers {
                debug!(singleton = %name, %loser, %winner, "singleton collision lost");
                self.excluded.insert(
                    loser,
                    Exclusion::Singleton {
                        selected: winner,
                        rejected: rejected.clone(),
                    },
                );
            }
        }
    }

    /// Gives every eligible fragment exactly one unresolved host.
    fn attach_fragments(&mut self, resolvable: &[Arc<Revision>]) -> Result<(), ResolveError> {
        for fragment in resolvable
            .iter()
            .filter(|r| r.is_fragment && !self.excluded.contains_key(&r.id))
        {
            let Some(requirement) = fragment.host_requirement() else {
                continue;
            };
            let found = self.index.find_providers(requirement)?;
            let matching: Vec<Arc<Capability>> =
                found.iter().map(|c| c.capability.clone()).collect();
            let mut hosts = Vec::new();
            for candidate in found {
                if candidate.resolved || !self.db.is_current(candidate.provider) {
                    continue;
                }
                if self.excluded.contains_key(&candidate.provider) {
                    self.referenced.insert(candidate.provider);
                    continue;
                }
                hosts.push(candidate.capability);
            }
            let eligible = !hosts.is_empty();
            self.hooks.filter_matches(requirement, &mut hosts);

            match hosts.first() {
                Some(host) => {
                    trace!(fragment = %fragment, host = %host.owner, "fragment attached");
                    self.host_of.insert(fragment.id, host.owner);
                    self.fragments_of
                        .entry(host.owner)
                        .or_default()
                        .push(fragment.id);
                }
                None => {
                    self.unattached.insert(
                        fragment.id,
                        HostSearch {
                            matching,
                            hook_removed: eligible,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Work-list in trigger order, then every provider the candidate lists pull in.
    fn populate(&mut self) -> Result<(), ResolveError> {
        let mut queue: VecDeque<RevisionId> = self.triggers.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if self.nodes.contains_key(&id)
                || self.excluded.contains_key(&id)
                || self.db.is_resolved(id)
                || !self.db.is_current(id)
            {
                continue;
            }
            let Some(revision) = self.db.revision(id).cloned() else {
                continue;
            };
            let pulled = self.add_node(revision)?;
            queue.extend(pulled);
        }
        debug!(nodes = self.nodes.len(), slots = self.slots.len(), "work-list populated");
        Ok(())
    }

    fn add_node(&mut self, revision: Arc<Revision>) -> Result<Vec<RevisionId>, ResolveError> {
        let id = revision.id;
        let mut pulled = Vec::new();
        let mut slots = Vec::new();

        if revision.is_fragment {
            if let Some(requirement) = revision.host_requirement() {
                let slot = match self.host_of.get(&id).copied() {
                    Some(host) => {
                        pulled.push(host);
                        let candidates: Vec<Candidate> = self
                            .db
                            .revision(host)
                            .and_then(|h| h.capabilities_in(HOST_NAMESPACE).next().cloned())
                            .map(|capability| Candidate {
                                capability,
                                provider: host,
                                resolved: false,
                            })
                            .into_iter()
                            .collect();
                        Slot::new(id, id, requirement.clone(), candidates, false)
                    }
                    None => {
                        let search = self.unattached.remove(&id).unwrap_or(HostSearch {
                            matching: Vec::new(),
                            hook_removed: false,
                        });
                        let mut slot =
                            Slot::new(id, id, requirement.clone(), Vec::new(), search.hook_removed);
                        slot.matching = search.matching;
                        slot
                    }
                };
                slots.push(self.push_slot(slot));
            }
            let own: Vec<Arc<Requirement>> = revision
                .requirements
                .iter()
                .filter(|r| r.namespace != HOST_NAMESPACE && !self.index.policy().is_mergeable(&r.namespace))
                .cloned()
                .collect();
            for requirement in own {
                if let Some(slot) = self.make_slot(id, id, requirement, &mut pulled)? {
                    slots.push(slot);
                }
            }
        } else {
            for requirement in revision.requirements.clone() {
                if let Some(slot) = self.make_slot(id, id, requirement, &mut pulled)? {
                    slots.push(slot);
                }
            }
            let fragments = self.fragments_of.get(&id).cloned().unwrap_or_default();
            for fragment in fragments {
                let Some(fragment_revision) = self.db.revision(fragment).cloned() else {
                    continue;
                };
                let merged: Vec<Arc<Requirement>> = fragment_revision
                    .requirements
                    .iter()
                    .filter(|r| self.index.policy().is_mergeable(&r.namespace))
                    .cloned()
                    .collect();
                for requirement in merged {
                    if let Some(slot) = self.make_slot(id, fragment, requirement, &mut pulled)? {
                        slots.push(slot);
                    }
                }
                pulled.push(fragment);
            }
        }

        self.nodes.insert(
            id,
            Node {
                revision,
                slots,
                failure: None,
            },
        );
        Ok(pulled)
    }

    fn push_slot(&mut self, slot: Slot) -> usize {
        let position = self.slots.len();
        self.declared.entry(slot.declared_by).or_default().push(position);
        self.slots.push(slot);
        self.bindings.push(None);
        position
    }

    fn make_slot(
        &mut self,
        requirer: RevisionId,
        declared_by: RevisionId,
        requirement: Arc<Requirement>,
        pulled: &mut Vec<RevisionId>,
    ) -> Result<Option<usize>, ResolveError> {
        if !requirement.is_effective() || requirement.resolution() == ResolutionMode::Dynamic {
            return Ok(None);
        }
        let found = self.index.find_providers(&requirement)?;
        let matching: Vec<Arc<Capability>> = found.iter().map(|c| c.capability.clone()).collect();
        let namespace = Namespace::of(&requirement.namespace);

        let mut candidates = Vec::new();
        for candidate in found {
            match self.effective_provider(&candidate) {
                Some(provider) if provider == requirer && !namespace.allows_self_wire() => {}
                Some(provider) => candidates.push(Candidate {
                    provider,
                    ..candidate
                }),
                None => {}
            }
        }

        let eligible = candidates.len();
        let mut capabilities: Vec<Arc<Capability>> =
            candidates.iter().map(|c| c.capability.clone()).collect();
        self.hooks.filter_matches(&requirement, &mut capabilities);
        candidates.retain(|c| capabilities.iter().any(|k| Arc::ptr_eq(k, &c.capability)));

        trace!(
            %requirement,
            matching = matching.len(),
            candidates = candidates.len(),
            "candidates collected"
        );
        pulled.extend(candidates.iter().filter(|c| !c.resolved).map(|c| c.provider));

        let hook_removed = eligible > 0 && candidates.is_empty();
        let mut slot = Slot::new(requirer, declared_by, requirement, candidates, hook_removed);
        slot.matching = matching;
        Ok(Some(self.push_slot(slot)))
    }

    /// The revision a candidate would wire to, or `None` when it is out of this call.
    fn effective_provider(&mut self, candidate: &Candidate) -> Option<RevisionId> {
        if candidate.resolved {
            return Some(candidate.provider);
        }
        let owner = candidate.provider;
        if self.excluded.contains_key(&owner) {
            self.referenced.insert(owner);
            return None;
        }
        let revision = self.db.revision(owner)?;
        if !revision.is_fragment {
            return Some(owner);
        }
        if !self.index.policy().is_mergeable(&candidate.capability.namespace) {
            return None;
        }
        let host = self.host_of.get(&owner).copied()?;
        if self.excluded.contains_key(&host) {
            self.referenced.insert(host);
            return None;
        }
        Some(host)
    }

    pub(super) fn is_failed(&self, id: RevisionId) -> bool {
        match self.nodes.get(&id) {
            Some(node) => node.failure.is_some(),
            None => !self.db.is_resolved(id),
        }
    }

    fn slot_active(&self, slot: &Slot) -> bool {
        slot.declared_by == slot.requirer || !self.is_failed(slot.declared_by)
    }

    fn is_valid(&self, slot_id: usize, position: usize) -> bool {
        let slot = &self.slots[slot_id];
        if slot.rejected.contains(&position) {
            return false;
        }
        let candidate = &slot.candidates[position];
        if !candidate.resolved {
            if self.is_failed(candidate.provider) {
                return false;
            }
            if candidate.capability.owner != candidate.provider
                && self.is_failed(candidate.capability.owner)
            {
                return false;
            }
            if self.substituted.contains(&candidate.capability.key()) {
                return false;
            }
        }
        match slot.substitution {
            Some(Substitution::External) => candidate.provider != slot.requirer,
            Some(Substitution::Internal) => candidate.provider == slot.requirer,
            None => true,
        }
    }

    fn valid_candidates(&self, slot_id: usize) -> Vec<usize> {
        (0..self.slots[slot_id].candidates.len())
            .filter(|position| self.is_valid(slot_id, *position))
            .collect()
    }

    fn has_valid(&self, slot_id: usize) -> bool {
        (0..self.slots[slot_id].candidates.len()).any(|position| self.is_valid(slot_id, position))
    }

    fn unsatisfied_slots(&self, id: RevisionId) -> Vec<usize> {
        self.declared
            .get(&id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&slot_id| {
                let slot = &self.slots[slot_id];
                !slot.requirement.is_optional()
                    && !self.is_failed(slot.requirer)
                    && !self.has_valid(slot_id)
            })
            .collect()
    }

    fn fail(&mut self, id: RevisionId, failure: Failure) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.failure.is_none() {
                debug!(revision = %node.revision, ?failure, "revision cannot resolve");
                node.failure = Some(failure);
            }
        }
    }

    /// Binding fixed point: fail, bind, check uses, backtrack, until stable.
    fn settle(&mut self) {
        loop {
            self.propagate_failures();
            if self.bind() {
                continue;
            }
            match self.find_conflict() {
                Some(conflict) => self.backtrack(conflict),
                None => break,
            }
        }
    }

    fn propagate_failures(&mut self) {
        loop {
            self.restore_substitutions();
            let failures: Vec<(RevisionId, Vec<usize>)> = self
                .nodes
                .iter()
                .filter(|(_, node)| node.failure.is_none())
                .map(|(id, _)| (*id, self.unsatisfied_slots(*id)))
                .filter(|(_, slots)| !slots.is_empty())
                .collect();
            if failures.is_empty() {
                break;
            }
            for (id, slots) in failures {
                self.fail(id, Failure::Requirements(slots));
            }
        }
    }

    /// Rewrites the binding table; true when a substitution decision changed candidate validity.
    fn bind(&mut self) -> bool {
        let mut decided = false;
        for position in 0..self.nodes.len() {
            let Some((_, node)) = self.nodes.get_index(position) else {
                continue;
            };
            let failed = node.failure.is_some();
            let slot_ids = node.slots.clone();
            for slot_id in slot_ids {
                if failed || !self.slot_active(&self.slots[slot_id]) {
                    self.bindings[slot_id] = None;
                    continue;
                }
                if self.slots[slot_id].substitution.is_none() && self.decide_substitution(slot_id) {
                    decided = true;
                }
                let valid = self.valid_candidates(slot_id);
                let chosen: Vec<usize> = match self.slots[slot_id].requirement.cardinality() {
                    Cardinality::Single => valid.into_iter().take(1).collect(),
                    Cardinality::Multiple => valid,
                };
                if chosen.is_empty() {
                    self.bindings[slot_id] = None;
                    continue;
                }
                let unchanged = self.bindings[slot_id]
                    .as_ref()
                    .is_some_and(|binding| binding.chosen == chosen);
                if !unchanged {
                    self.sequence += 1;
                    let slot = &self.slots[slot_id];
                    trace!(
                        requirement = %slot.requirement,
                        providers = ?chosen.iter().map(|c| slot.candidates[*c].provider).collect::<Vec<_>>(),
                        sequence = self.sequence,
                        "bound"
                    );
                    self.bindings[slot_id] = Some(Binding {
                        chosen,
                        sequence: self.sequence,
                    });
                }
            }
        }
        decided
    }

    /// Import-versus-own-export choice for a package slot, made once per call.
    fn decide_substitution(&mut self, slot_id: usize) -> bool {
        let slot = &self.slots[slot_id];
        if slot.requirement.namespace != PACKAGE_NAMESPACE
            || slot.requirement.cardinality() == Cardinality::Multiple
        {
            return false;
        }
        let valid = self.valid_candidates(slot_id);
        let (own, external): (Vec<usize>, Vec<usize>) = valid
            .into_iter()
            .partition(|position| slot.candidates[*position].provider == slot.requirer);
        let Some(first_external) = external.first() else {
            return false;
        };
        if own.is_empty() {
            return false;
        }

        let requirer = slot.requirer;
        let external = &slot.candidates[*first_external];
        let package = external.capability.name().unwrap_or_default().to_string();
        let loops_back = self.bound_source(external.provider, &package) == Some(requirer);
        let choice = if loops_back {
            Substitution::Internal
        } else {
            Substitution::External
        };
        if choice == Substitution::External {
            let keys: Vec<_> = own
                .iter()
                .map(|position| slot.candidates[*position].capability.key())
                .collect();
            self.substituted.extend(keys);
        }
        debug!(revision = %requirer, %package, ?choice, "substitutable export decided");
        self.slots[slot_id].substitution = Some(choice);
        true
    }

    /// Falls back to the own export for slots whose external providers all failed.
    fn restore_substitutions(&mut self) {
        for slot_id in 0..self.slots.len() {
            let slot = &self.slots[slot_id];
            if slot.substitution != Some(Substitution::External)
                || self.is_failed(slot.requirer)
                || self.has_valid(slot_id)
            {
                continue;
            }
            let own: Vec<CapabilityKey> = slot
                .candidates
                .iter()
                .filter(|c| c.provider == slot.requirer)
                .map(|c| c.capability.key())
                .collect();
            debug!(
                revision = %slot.requirer,
                requirement = %slot.requirement,
                "external provider lost; keeping own export"
            );
            for key in &own {
                self.substituted.remove(key);
            }
            self.slots[slot_id].substitution = Some(Substitution::Internal);
        }
    }

    /// Where `revision` currently gets `package` from through an import.
    fn bound_source(&self, revision: RevisionId, package: &str) -> Option<RevisionId> {
        if let Some(wiring) = self.db.wiring(revision) {
            return wiring.package_wire(package).map(|w| w.provider);
        }
        let node = self.nodes.get(&revision)?;
        node.slots.iter().find_map(|slot_id| {
            let slot = &self.slots[*slot_id];
            if slot.requirer != revision || slot.requirement.namespace != PACKAGE_NAMESPACE {
                return None;
            }
            let binding = self.bindings[*slot_id].as_ref()?;
            binding
                .chosen
                .iter()
                .map(|position| &slot.candidates[*position])
                .find(|c| c.capability.name() == Some(package))
                .map(|c| c.provider)
        })
    }

    fn backtrack(&mut self, conflict: Conflict) {
        self.backtracks += 1;
        let blamed = conflict
            .blame
            .iter()
            .filter_map(|slot_id| {
                self.bindings[*slot_id]
                    .as_ref()
                    .map(|binding| (*slot_id, binding.sequence))
            })
            .max_by_key(|(_, sequence)| *sequence);

        match blamed {
            Some((slot_id, _)) if self.backtracks <= self.config.max_uses_backtracks => {
                let chosen = self.bindings[slot_id]
                    .take()
                    .map(|binding| binding.chosen)
                    .unwrap_or_default();
                let slot = &mut self.slots[slot_id];
                debug!(
                    revision = %conflict.revision,
                    package = %conflict.package,
                    requirement = %slot.requirement,
                    backtracks = self.backtracks,
                    "uses conflict; rejecting most recent binding"
                );
                slot.rejected.extend(chosen);
                slot.conflict = Some((conflict.package, conflict.providers));
            }
            _ => {
                debug!(
                    revision = %conflict.revision,
                    package = %conflict.package,
                    backtracks = self.backtracks,
                    "uses conflict cannot be repaired"
                );
                self.fail(
                    conflict.revision,
                    Failure::Uses {
                        package: conflict.package,
                        providers: conflict.providers,
                    },
                );
            }
        }
    }

    fn trigger_failed(&self) -> bool {
        self.triggers.iter().any(|id| {
            self.excluded.contains_key(id)
                || self.nodes.get(id).is_some_and(|node| node.failure.is_some())
        })
    }

    fn roll_back(&mut self) {
        for id in self.triggers.clone() {
            self.fail(id, Failure::Rollback);
        }
    }

    fn classify(slot: &Slot) -> EntryType {
        if slot.matching.is_empty() {
            EntryType::MissingCapability
        } else if slot.hook_removed {
            EntryType::FilteredByHook
        } else if !slot.rejected.is_empty() {
            EntryType::UsesConstraintViolation
        } else {
            EntryType::UnresolvedProvider
        }
    }

    fn requirement_entries(&self, slot_ids: &[usize]) -> Vec<ReportEntry> {
        let mut grouped: IndexMap<EntryType, Vec<&Slot>> = IndexMap::new();
        for slot_id in slot_ids {
            let slot = &self.slots[*slot_id];
            grouped.entry(Self::classify(slot)).or_default().push(slot);
        }
        grouped
            .into_iter()
            .map(|(kind, slots)| {
                let message = slots
                    .iter()
                    .map(|slot| slot.requirement.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                let conflict = slots.iter().find_map(|slot| slot.conflict.clone());
                let data = match (kind, conflict) {
                    (EntryType::UsesConstraintViolation, Some((package, providers))) => {
                        EntryData::UsesConflict { package, providers }
                    }
                    _ => EntryData::Requirements(
                        slots
                            .iter()
                            .map(|slot| UnsatisfiedRequirement {
                                requirement: slot.requirement.clone(),
                                candidates: slot.matching.clone(),
                            })
                            .collect(),
                    ),
                };
                ReportEntry::new(kind, data, message)
            })
            .collect()
    }

    fn wiring_for(&self, id: RevisionId, node: &Node) -> Wiring {
        let policy = self.index.policy();
        let revision = &node.revision;
        let mut capabilities: Vec<Arc<Capability>>;
        let mut requirements: Vec<Arc<Requirement>>;
        let mut fragments = Vec::new();

        if revision.is_fragment {
            capabilities = revision
                .capabilities
                .iter()
                .filter(|c| !policy.is_mergeable(&c.namespace))
                .cloned()
                .collect();
            requirements = revision
                .requirements
                .iter()
                .filter(|r| !policy.is_mergeable(&r.namespace))
                .cloned()
                .collect();
        } else {
            capabilities = revision.capabilities.clone();
            requirements = revision.requirements.clone();
            for fragment in self.fragments_of.get(&id).into_iter().flatten() {
                if self.is_failed(*fragment) {
                    continue;
                }
                let Some(fragment_revision) = self.db.revision(*fragment) else {
                    continue;
                };
                capabilities.extend(
                    fragment_revision
                        .capabilities
                        .iter()
                        .filter(|c| policy.is_mergeable(&c.namespace))
                        .cloned(),
                );
                requirements.extend(
                    fragment_revision
                        .requirements
                        .iter()
                        .filter(|r| policy.is_mergeable(&r.namespace))
                        .cloned(),
                );
                fragments.push(*fragment);
            }
        }

        let (substituted, capabilities): (Vec<_>, Vec<_>) = capabilities
            .into_iter()
            .partition(|c| self.substituted.contains(&c.key()));

        let mut required_wires = Vec::new();
        for slot_id in &node.slots {
            let Some(binding) = &self.bindings[*slot_id] else {
                continue;
            };
            let slot = &self.slots[*slot_id];
            for position in &binding.chosen {
                let candidate = &slot.candidates[*position];
                required_wires.push(Wire::new(
                    slot.requirer,
                    slot.requirement.clone(),
                    candidate.provider,
                    candidate.capability.clone(),
                ));
            }
        }

        Wiring {
            revision: id,
            capabilities,
            requirements,
            required_wires,
            fragments,
            substituted,
        }
    }

    fn finish(self) -> Resolution {
        let mut report = ResolutionReport::new();

        for (id, exclusion) in &self.excluded {
            if !self.triggers.contains(id) && !self.referenced.contains(id) {
                continue;
            }
            let entry = match exclusion {
                Exclusion::FilteredByHook => ReportEntry::new(
                    EntryType::FilteredByHook,
                    EntryData::None,
                    "removed from resolution by a resolver hook",
                ),
                Exclusion::Singleton { selected, rejected } => ReportEntry::new(
                    EntryType::SingletonSelection,
                    EntryData::Singleton {
                        selected: *selected,
                        rejected: rejected.clone(),
                    },
                    format!("singleton {} was selected instead", selected),
                ),
            };
            report.add_entry(*id, entry);
        }

        let mut wirings = Vec::new();
        for (id, node) in &self.nodes {
            match &node.failure {
                None => {
                    wirings.push(self.wiring_for(*id, node));
                    report.resolved.push(*id);
                }
                Some(Failure::Requirements(slot_ids)) => {
                    for entry in self.requirement_entries(slot_ids) {
                        report.add_entry(*id, entry);
                    }
                }
                Some(Failure::Uses { package, providers }) => report.add_entry(
                    *id,
                    ReportEntry::new(
                        EntryType::UsesConstraintViolation,
                        EntryData::UsesConflict {
                            package: package.clone(),
                            providers: providers.clone(),
                        },
                        format!("package {} is visible from more than one provider", package),
                    ),
                ),
                Some(Failure::Rollback) => {}
            }
        }

        info!(
            resolved = report.resolved.len(),
            failed = report.entries.len(),
            backtracks = self.backtracks,
            "resolution finished"
        );
        Resolution { wirings, report }
    }
}

impl Slot {
    fn new(
        requirer: RevisionId,
        declared_by: RevisionId,
        requirement: Arc<Requirement>,
        candidates: Vec<Candidate>,
        hook_removed: bool,
    ) -> Self {
        let matching = candidates.iter().map(|c| c.capability.clone()).collect();
        Self {
            requirer,
            declared_by,
            requirement,
            candidates,
            matching,
            hook_removed,
            rejected: HashSet::new(),
            substitution: None,
            conflict: None,
        }
    }
}
