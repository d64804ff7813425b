//! Late binding of one package for a revision that is already resolved.
//!
//! Only the candidate index and `filter_matches` hooks take part: the requester's
//! wiring is fixed, so no singleton, uses or fragment work is repeated.

use std::collections::{HashMap, HashSet};
use std::iter;
use std::sync::Arc;

use crate::models::{
    Capability, Filter, FilterError, Requirement, Resolution, RevisionId, Wiring,
    CARDINALITY_DIRECTIVE, PACKAGE_NAMESPACE, RESOLUTION_DIRECTIVE,
};

use super::database::ModuleDatabase;
use super::hooks::HookChain;
use super::index::{Candidate, CandidateIndex};
use super::report::EntryType;

/// Failed `(revision, package)` lookups, kept until a provider of the package may exist.
///
/// A miss that saw candidates is kept only until the next install or commit,
/// since any new revision may be what those candidates were missing.
#[derive(Debug, Default)]
pub struct DynamicMissCache {
    misses: HashMap<(RevisionId, String), bool>,
}

impl DynamicMissCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, revision: RevisionId, package: &str) -> bool {
        self.misses.contains_key(&(revision, package.to_string()))
    }

    pub fn record(&mut self, revision: RevisionId, package: &str, had_candidates: bool) {
        self.misses
            .insert((revision, package.to_string()), had_candidates);
    }

    /// Drops every miss for the given package names and every miss that had candidates.
    pub fn invalidate<'p>(&mut self, packages: impl IntoIterator<Item = &'p str>) {
        let packages: HashSet<&str> = packages.into_iter().collect();
        self.misses.retain(|(_, package), had_candidates| {
            !*had_candidates && !packages.contains(package.as_str())
        });
    }

    pub fn forget_revision(&mut self, revision: RevisionId) {
        self.misses.retain(|(owner, _), _| *owner != revision);
    }

    pub fn clear(&mut self) {
        self.misses.clear();
    }

    pub fn len(&self) -> usize {
        self.misses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.misses.is_empty()
    }
}

/// Whether the wiring already imports or exports `package`.
pub fn is_visible(wiring: &Wiring, package: &str) -> bool {
    wiring.package_wire(package).is_some() || wiring.exported_package(package).is_some()
}

/// The dynamic package requirements of a wiring, merged fragment ones included.
pub fn dynamic_requirements(wiring: &Wiring) -> impl Iterator<Item = &Arc<Requirement>> {
    wiring.requirements.iter().filter(|r| {
        r.namespace == PACKAGE_NAMESPACE
            && r.resolution() == Resolution::Dynamic
            && r.is_effective()
    })
}

/// `declared` narrowed to exactly `package`, as a mandatory single requirement.
pub fn synthesize(declared: &Requirement, package: &str) -> Result<Requirement, FilterError> {
    let pinned = Filter::equal(PACKAGE_NAMESPACE, package);
    let filter = Filter::and(iter::once(pinned).chain(declared.filter()?.cloned()));
    let mut directives = declared.directives.clone();
    directives.shift_remove(RESOLUTION_DIRECTIVE);
    directives.shift_remove(CARDINALITY_DIRECTIVE);
    Ok(Requirement::with_filter(
        PACKAGE_NAMESPACE,
        filter,
        directives,
        declared.owner,
        declared.ordinal,
    ))
}

/// The outcome of one candidate search for a synthetic requirement.
#[derive(Debug, Default)]
pub struct DynamicCandidates {
    /// Every capability the index matched.
    pub matching: Vec<Arc<Capability>>,
    /// Bindable candidates left after `filter_matches`, in preference order.
    pub candidates: Vec<Candidate>,
    /// Some candidate was eligible and the hooks removed all of them.
    pub hook_removed: bool,
}

impl DynamicCandidates {
    /// How a lookup that bound none of these candidates is reported.
    pub fn entry_type(&self) -> EntryType {
        if self.matching.is_empty() {
            EntryType::MissingCapability
        } else if self.hook_removed {
            EntryType::FilteredByHook
        } else {
            EntryType::UnresolvedProvider
        }
    }
}

/// Index candidates for a synthetic requirement after `filter_matches`.
///
/// Unresolved fragments are skipped; their capabilities only become available
/// through a host.
pub fn candidates(
    db: &ModuleDatabase,
    index: &CandidateIndex,
    hooks: &mut HookChain,
    requirement: &Requirement,
) -> Result<DynamicCandidates, FilterError> {
    let found = index.find_providers(requirement)?;
    let matching = found.iter().map(|c| c.capability.clone()).collect();
    let mut candidates: Vec<Candidate> = found
        .into_iter()
        .filter(|c| c.provider != requirement.owner)
        .filter(|c| c.resolved || db.revision(c.provider).is_some_and(|r| !r.is_fragment))
        .collect();
    let eligible = !candidates.is_empty();
    let mut capabilities = candidates.iter().map(|c| c.capability.clone()).collect();
    hooks.filter_matches(requirement, &mut capabilities);
    candidates.retain(|c| capabilities.iter().any(|k| Arc::ptr_eq(k, &c.capability)));
    Ok(DynamicCandidates {
        matching,
        hook_removed: eligible && candidates.is_empty(),
        candidates,
    })
}
