//! Capability lookup across the installed universe.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::models::{Capability, FilterError, Requirement, RevisionId, PACKAGE_NAMESPACE};

use super::database::ModuleDatabase;
use super::namespace::{Namespace, NamespacePolicy};

/// A capability offered for a requirement, with the revision that would provide it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub capability: Arc<Capability>,
    /// The owner, or the host a fragment's capability was merged into.
    pub provider: RevisionId,
    /// Provider already holds a committed wiring.
    pub resolved: bool,
}

impl Candidate {
    pub fn same_capability(&self, other: &Candidate) -> bool {
        Arc::ptr_eq(&self.capability, &other.capability) && self.provider == other.provider
    }
}

#[derive(Debug, Default)]
struct NamespaceEntries {
    candidates: Vec<Candidate>,
    by_name: HashMap<String, Vec<usize>>,
}

/// Read-only index built from one database snapshot.
#[derive(Debug)]
pub struct CandidateIndex {
    policy: NamespacePolicy,
    namespaces: HashMap<String, NamespaceEntries>,
}

impl CandidateIndex {
    pub fn build(db: &ModuleDatabase, policy: &NamespacePolicy, config: &ResolverConfig) -> Self {
        let mut namespaces: HashMap<String, NamespaceEntries> = HashMap::new();
        let mut add = |candidate: Candidate| {
            let entries = namespaces
                .entry(candidate.capability.namespace.clone())
                .or_default();
            if let Some(name) = candidate.capability.name() {
                entries
                    .by_name
                    .entry(name.to_string())
                    .or_default()
                    .push(entries.candidates.len());
            }
            entries.candidates.push(candidate);
        };

        for revision in db.revisions() {
            let offered = db.is_current(revision.id)
                || (config.offer_removal_pending && db.is_removal_pending(revision.id));
            if !offered {
                continue;
            }
            match db.wiring(revision.id) {
                Some(wiring) => {
                    for capability in &wiring.capabilities {
                        add(Candidate {
                            capability: capability.clone(),
                            provider: revision.id,
                            resolved: true,
                        });
                    }
                }
                None => {
                    for capability in &revision.capabilities {
                        add(Candidate {
                            capability: capability.clone(),
                            provider: revision.id,
                            resolved: false,
                        });
                    }
                }
            }
        }

        Self {
            policy: policy.clone(),
            namespaces,
        }
    }

    pub fn policy(&self) -> &NamespacePolicy {
        &self.policy
    }

    /// Every capability satisfying `requirement`, resolved providers first,
    /// then highest version, then earliest installed.
    pub fn find_providers(&self, requirement: &Requirement) -> Result<Vec<Candidate>, FilterError> {
        let Some(entries) = self.namespaces.get(&requirement.namespace) else {
            // Still surface malformed filters.
            requirement.filter()?;
            return Ok(Vec::new());
        };

        let pinned = match requirement.filter()? {
            Some(filter) if requirement.namespace == PACKAGE_NAMESPACE => {
                filter.pinned_value(PACKAGE_NAMESPACE).map(str::to_string)
            }
            _ => None,
        };
        let positions: Box<dyn Iterator<Item = usize>> = match &pinned {
            Some(name) => Box::new(
                entries
                    .by_name
                    .get(name)
                    .map(|p| p.clone().into_iter())
                    .into_iter()
                    .flatten(),
            ),
            None => Box::new(0..entries.candidates.len()),
        };

        let mut found = Vec::new();
        for position in positions {
            let candidate = &entries.candidates[position];
            if self.policy.matches(requirement, &candidate.capability)? {
                found.push(candidate.clone());
            }
        }

        let version_attribute = Namespace::of(&requirement.namespace).version_attribute();
        found.sort_by(|a, b| compare_candidates(a, b, version_attribute));
        Ok(found)
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate, version_attribute: &str) -> Ordering {
    b.resolved
        .cmp(&a.resolved)
        .then_with(|| {
            b.capability
                .version_of(version_attribute)
                .cmp(&a.capability.version_of(version_attribute))
        })
        .then(a.provider.cmp(&b.provider))
        .then(a.capability.ordinal.cmp(&b.capability.ordinal))
}
