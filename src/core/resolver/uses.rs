//! Package-space consistency across `uses` links.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::models::{Capability, RevisionId, Visibility, Wiring, BUNDLE_NAMESPACE, PACKAGE_NAMESPACE};

use super::session::Session;

/// Two providers of one package visible from the same revision.
#[derive(Debug, Clone)]
pub(super) struct Conflict {
    pub(super) revision: RevisionId,
    pub(super) package: String,
    pub(super) providers: Vec<RevisionId>,
    /// Slots of `revision` whose bindings brought the providers in.
    pub(super) blame: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Source {
    provider: RevisionId,
    capability: Arc<Capability>,
    slot: Option<usize>,
}

type PackageSpace = IndexMap<String, Source>;

type Spaces = HashMap<RevisionId, Rc<PackageSpace>>;

impl Session<'_> {
    /// The first uses conflict among live revisions, in processing order.
    pub(super) fn find_conflict(&self) -> Option<Conflict> {
        let mut spaces = Spaces::new();
        let live: Vec<RevisionId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.failure.is_none() && !node.revision.is_fragment)
            .map(|(id, _)| *id)
            .collect();
        live.into_iter()
            .find_map(|id| self.check_space(id, &mut spaces))
    }

    fn check_space(&self, id: RevisionId, spaces: &mut Spaces) -> Option<Conflict> {
        let space = self.space_of(id, spaces);
        let mut seen: HashMap<String, (RevisionId, Option<usize>)> = space
            .iter()
            .map(|(name, source)| (name.clone(), (source.provider, source.slot)))
            .collect();

        for (package, source) in space.iter() {
            let mut stack = vec![(source.capability.clone(), source.provider)];
            let mut visited = HashSet::new();
            while let Some((capability, provider)) = stack.pop() {
                if !visited.insert((capability.key(), provider)) {
                    continue;
                }
                let used = capability.uses();
                if used.is_empty() {
                    continue;
                }
                let provider_space = self.space_of(provider, spaces);
                for name in used {
                    let Some(used_source) = provider_space.get(name) else {
                        continue;
                    };
                    match seen.get(name) {
                        Some((existing, blame)) if *existing != used_source.provider => {
                            trace!(revision = %id, %package, used = name, "uses conflict found");
                            return Some(Conflict {
                                revision: id,
                                package: name.to_string(),
                                providers: vec![*existing, used_source.provider],
                                blame: blame.iter().chain(source.slot.iter()).copied().collect(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            seen.insert(name.to_string(), (used_source.provider, source.slot));
                        }
                    }
                    stack.push((used_source.capability.clone(), used_source.provider));
                }
            }
        }
        None
    }

    fn space_of(&self, id: RevisionId, spaces: &mut Spaces) -> Rc<PackageSpace> {
        if let Some(space) = spaces.get(&id) {
            return space.clone();
        }
        let space = Rc::new(match self.db.wiring(id) {
            Some(wiring) => self.committed_space(wiring),
            None => self.session_space(id),
        });
        spaces.insert(id, space.clone());
        space
    }

    /// Imports, then own exports, then packages of required bundles.
    fn session_space(&self, id: RevisionId) -> PackageSpace {
        let mut space = PackageSpace::new();
        let Some(node) = self.nodes.get(&id) else {
            return space;
        };
        let mut bundles = Vec::new();
        for slot_id in &node.slots {
            let slot = &self.slots[*slot_id];
            if slot.requirer != id {
                continue;
            }
            let Some(binding) = &self.bindings[*slot_id] else {
                continue;
            };
            for position in &binding.chosen {
                let candidate = &slot.candidates[*position];
                match slot.requirement.namespace.as_str() {
                    PACKAGE_NAMESPACE => {
                        if let Some(name) = candidate.capability.name() {
                            space.entry(name.to_string()).or_insert(Source {
                                provider: candidate.provider,
                                capability: candidate.capability.clone(),
                                slot: Some(*slot_id),
                            });
                        }
                    }
                    BUNDLE_NAMESPACE => bundles.push((*slot_id, candidate.provider)),
                    _ => {}
                }
            }
        }
        for capability in self.session_exports(id) {
            if let Some(name) = capability.name() {
                space.entry(name.to_string()).or_insert(Source {
                    provider: id,
                    capability: capability.clone(),
                    slot: None,
                });
            }
        }
        for (slot_id, provider) in bundles {
            let mut visited = HashSet::new();
            for (exporter, capability) in self.bundle_exports(provider, &mut visited) {
                if let Some(name) = capability.name() {
                    space.entry(name.to_string()).or_insert(Source {
                        provider: exporter,
                        capability,
                        slot: Some(slot_id),
                    });
                }
            }
        }
        space
    }

    fn committed_space(&self, wiring: &Wiring) -> PackageSpace {
        let mut space = PackageSpace::new();
        for wire in wiring.wires_in(PACKAGE_NAMESPACE) {
            if let Some(name) = wire.capability.name() {
                space.entry(name.to_string()).or_insert(Source {
                    provider: wire.provider,
                    capability: wire.capability.clone(),
                    slot: None,
                });
            }
        }
        for capability in wiring
            .capabilities
            .iter()
            .filter(|c| c.namespace == PACKAGE_NAMESPACE)
        {
            if let Some(name) = capability.name() {
                space.entry(name.to_string()).or_insert(Source {
                    provider: wiring.revision,
                    capability: capability.clone(),
                    slot: None,
                });
            }
        }
        for wire in wiring.wires_in(BUNDLE_NAMESPACE) {
            let mut visited = HashSet::new();
            for (exporter, capability) in self.bundle_exports(wire.provider, &mut visited) {
                if let Some(name) = capability.name() {
                    space.entry(name.to_string()).or_insert(Source {
                        provider: exporter,
                        capability,
                        slot: None,
                    });
                }
            }
        }
        space
    }

    /// Package exports of an unresolved node, merged fragments included, minus substitutions.
    fn session_exports(&self, id: RevisionId) -> Vec<Arc<Capability>> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let fragments = self
            .fragments_of
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|f| !self.is_failed(**f))
            .filter_map(|f| self.db.revision(*f));
        std::iter::once(&node.revision)
            .chain(fragments)
            .flat_map(|revision| revision.capabilities_in(PACKAGE_NAMESPACE))
            .filter(|c| !self.substituted.contains(&c.key()))
            .cloned()
            .collect()
    }

    /// Everything requiring `provider` as a bundle makes visible, following reexports.
    fn bundle_exports(
        &self,
        provider: RevisionId,
        visited: &mut HashSet<RevisionId>,
    ) -> Vec<(RevisionId, Arc<Capability>)> {
        if !visited.insert(provider) {
            return Vec::new();
        }
        let mut exports = Vec::new();
        match self.db.wiring(provider) {
            Some(wiring) => {
                exports.extend(
                    wiring
                        .capabilities
                        .iter()
                        .filter(|c| c.namespace == PACKAGE_NAMESPACE)
                        .map(|c| (provider, c.clone())),
                );
                let reexported: Vec<RevisionId> = wiring
                    .wires_in(BUNDLE_NAMESPACE)
                    .filter(|w| w.requirement.visibility() == Visibility::Reexport)
                    .map(|w| w.provider)
                    .collect();
                for next in reexported {
                    exports.extend(self.bundle_exports(next, visited));
                }
            }
            None => {
                exports.extend(
                    self.session_exports(provider)
                        .into_iter()
                        .map(|c| (provider, c)),
                );
                let reexported: Vec<RevisionId> = self
                    .nodes
                    .get(&provider)
                    .into_iter()
                    .flat_map(|node| node.slots.iter())
                    .filter_map(|slot_id| {
                        let slot = &self.slots[*slot_id];
                        let binding = self.bindings[*slot_id].as_ref()?;
                        (slot.requirer == provider
                            && slot.requirement.namespace == BUNDLE_NAMESPACE
                            && slot.requirement.visibility() == Visibility::Reexport)
                            .then(|| {
                                binding
                                    .chosen
                                    .iter()
                                    .map(|position| slot.candidates[*position].provider)
                                    .collect::<Vec<_>>()
                            })
                    })
                    .flatten()
                    .collect();
                for next in reexported {
                    exports.extend(self.bundle_exports(next, visited));
                }
            }
        }
        exports
    }
}
