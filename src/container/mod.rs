//! The module container: installs revisions and owns the committed wirings.
//!
//! Resolution plans against an upgradable read of the module database, so
//! readers keep going while one resolver works; only the commit upgrades to the
//! exclusive lock. Listeners are called after every lock is released.

mod events;

pub use events::{WiringEvent, WiringListener};

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

use crate::config::ContainerConfig;
use crate::core::dynamic::{self, DynamicMissCache};
use crate::core::{
    CandidateIndex, EntryData, EntryType, HookChain, ModuleDatabase, NamespacePolicy,
    ReportEntry, Resolution, ResolutionContext, ResolutionReport, ResolveError, Resolver,
    ResolverHookFactory, UnsatisfiedRequirement,
};
use crate::models::{
    Capability, DescriptorError, FilterError, Requirement, Revision, RevisionDescriptor,
    RevisionId, Wire, Wiring, PACKAGE_NAMESPACE,
};

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Install collision: {0}")]
    Collision(String),
    #[error("Unknown revision {0}")]
    UnknownRevision(RevisionId),
    #[error("Nothing installed at {0}")]
    UnknownLocation(String),
    #[error("Revision {0} is not resolved")]
    NotResolved(RevisionId),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Invalid requirement filter: {0}")]
    Filter(#[from] FilterError),
}

pub struct ContainerBuilder {
    config: ContainerConfig,
    hooks: Vec<Arc<dyn ResolverHookFactory>>,
    listeners: Vec<Arc<dyn WiringListener>>,
}

impl ContainerBuilder {
    /// Registers a hook factory; factories run in registration order.
    pub fn hook(mut self, factory: impl ResolverHookFactory + 'static) -> Self {
        self.hooks.push(Arc::new(factory));
        self
    }

    pub fn listener(mut self, listener: impl WiringListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Creates the container and resolves its system revision.
    pub fn build(self) -> Result<Container, ContainerError> {
        let policy = NamespacePolicy::new(&self.config.resolver);
        let system_descriptor = self.config.system.descriptor();
        let mut container = Container {
            config: self.config,
            policy,
            db: RwLock::new(ModuleDatabase::new()),
            install_locks: Mutex::new(HashMap::new()),
            hooks: self.hooks,
            listeners: self.listeners,
            misses: Mutex::new(DynamicMissCache::new()),
            system: RevisionId(0),
        };
        container.system = container.install(system_descriptor)?;
        let report = container.resolve(&[container.system], false)?;
        if !container.is_resolved(container.system) {
            warn!(summary = %report.summary(), "system revision did not resolve");
        }
        Ok(container)
    }
}

pub struct Container {
    config: ContainerConfig,
    policy: NamespacePolicy,
    db: RwLock<ModuleDatabase>,
    install_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hooks: Vec<Arc<dyn ResolverHookFactory>>,
    listeners: Vec<Arc<dyn WiringListener>>,
    misses: Mutex<DynamicMissCache>,
    system: RevisionId,
}

fn exported_packages(capabilities: &[Arc<Capability>]) -> impl Iterator<Item = &str> {
    capabilities
        .iter()
        .filter(|c| c.namespace == PACKAGE_NAMESPACE)
        .filter_map(|c| c.name())
}

fn check_identity(
    db: &ModuleDatabase,
    revision: &Revision,
    replacing: Option<RevisionId>,
) -> Result<(), ContainerError> {
    let duplicate = db.current_revisions().find(|r| {
        Some(r.id) != replacing
            && r.symbolic_name == revision.symbolic_name
            && r.version == revision.version
    });
    match duplicate {
        Some(existing) => Err(ContainerError::Collision(format!(
            "{}_{} is already installed at {}",
            revision.symbolic_name, revision.version, existing.location
        ))),
        None => Ok(()),
    }
}

/// Discards a revision that lost its current status, unless something still wires to it.
fn retire(db: &mut ModuleDatabase, old: RevisionId) -> Vec<WiringEvent> {
    let attached = db.wirings().any(|w| w.fragments.contains(&old));
    if attached || !db.dependents_of(old).is_empty() {
        debug!(revision = %old, "kept as removal pending");
        db.mark_removal_pending(old);
        return Vec::new();
    }
    let was_resolved = db.is_resolved(old);
    db.discard(old);
    if was_resolved {
        vec![WiringEvent::Unresolved(old)]
    } else {
        Vec::new()
    }
}

impl Container {
    pub fn builder(config: ContainerConfig) -> ContainerBuilder {
        ContainerBuilder {
            config,
            hooks: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// A container with the default configuration and no hooks.
    pub fn new() -> Result<Self, ContainerError> {
        Self::builder(ContainerConfig::default()).build()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn system_revision(&self) -> RevisionId {
        self.system
    }

    fn location_lock(&self, location: &str) -> Arc<Mutex<()>> {
        self.install_locks
            .lock()
            .entry(location.to_string())
            .or_default()
            .clone()
    }

    /// Forgets the install lock of an empty `location` once no other caller holds it.
    fn release_location(&self, location: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.install_locks.lock();
        if Arc::strong_count(lock) == 2 && self.db.read().current_revision(location).is_none() {
            locks.remove(location);
        }
    }

    fn emit(&self, events: &[WiringEvent]) {
        for event in events {
            for listener in &self.listeners {
                listener.on_event(event);
            }
        }
    }

    pub fn install(&self, descriptor: RevisionDescriptor) -> Result<RevisionId, ContainerError> {
        let location = descriptor.location();
        let lock = self.location_lock(&location);
        let installed = {
            let _serialized = lock.lock();
            self.insert_new(&location, descriptor)
        };
        let revision = match installed {
            Ok(revision) => revision,
            Err(error) => {
                self.release_location(&location, &lock);
                return Err(error);
            }
        };
        self.misses
            .lock()
            .invalidate(exported_packages(&revision.capabilities));
        info!(revision = %revision, %location, "installed");
        Ok(revision.id)
    }

    fn insert_new(
        &self,
        location: &str,
        descriptor: RevisionDescriptor,
    ) -> Result<Arc<Revision>, ContainerError> {
        let mut db = self.db.write();
        if db.current_revision(location).is_some() {
            return Err(ContainerError::Collision(format!(
                "location {} is already installed",
                location
            )));
        }
        let id = db.allocate_id();
        let revision = Arc::new(descriptor.build(id)?);
        check_identity(&db, &revision, None)?;
        db.insert(revision.clone());
        Ok(revision)
    }

    /// Installs a new current revision at `location`.
    pub fn update(
        &self,
        location: &str,
        descriptor: RevisionDescriptor,
    ) -> Result<RevisionId, ContainerError> {
        let lock = self.location_lock(location);
        let _serialized = lock.lock();

        let (revision, old, events) = {
            let mut db = self.db.write();
            let old = db
                .current_revision(location)
                .ok_or_else(|| ContainerError::UnknownLocation(location.to_string()))?;
            let id = db.allocate_id();
            let revision = Arc::new(descriptor.at(location).build(id)?);
            check_identity(&db, &revision, Some(old))?;
            db.insert(revision.clone());
            let events = retire(&mut db, old);
            (revision, old, events)
        };
        {
            let mut misses = self.misses.lock();
            misses.invalidate(exported_packages(&revision.capabilities));
            misses.forget_revision(old);
        }
        info!(revision = %revision, %location, "updated");
        self.emit(&events);
        Ok(revision.id)
    }

    pub fn uninstall(&self, location: &str) -> Result<(), ContainerError> {
        let lock = self.location_lock(location);
        let retired = {
            let _serialized = lock.lock();
            let mut db = self.db.write();
            db.remove_current(location).map(|old| retire(&mut db, old))
        };
        self.release_location(location, &lock);
        let events =
            retired.ok_or_else(|| ContainerError::UnknownLocation(location.to_string()))?;
        self.misses.lock().clear();
        info!(%location, "uninstalled");
        self.emit(&events);
        Ok(())
    }

    fn plan(
        &self,
        db: &ModuleDatabase,
        context: &ResolutionContext,
    ) -> Result<Resolution, ResolveError> {
        let index = CandidateIndex::build(db, &self.policy, &self.config.resolver);
        let mut hooks = HookChain::begin(&self.hooks, &context.triggers);
        let resolution = Resolver::new(db, &index, &self.config.resolver).resolve(context, &mut hooks);
        hooks.end();
        resolution
    }

    fn commit(&self, db: &mut ModuleDatabase, wirings: Vec<Wiring>) -> Vec<WiringEvent> {
        let mut events = Vec::with_capacity(wirings.len());
        let mut exported: Vec<String> = Vec::new();
        for wiring in wirings {
            exported.extend(exported_packages(&wiring.capabilities).map(str::to_string));
            events.push(WiringEvent::Resolved(wiring.revision));
            db.commit_wiring(wiring);
        }
        self.misses
            .lock()
            .invalidate(exported.iter().map(String::as_str));
        debug!(committed = events.len(), generation = db.generation(), "wirings committed");
        events
    }

    /// Resolves `triggers`. With `mandatory`, either every trigger commits or none does.
    pub fn resolve(
        &self,
        triggers: &[RevisionId],
        mandatory: bool,
    ) -> Result<ResolutionReport, ContainerError> {
        let context = ResolutionContext::new(triggers.iter().copied(), mandatory);
        let (report, events) = {
            let guard = self.db.upgradable_read();
            let Resolution { wirings, report } = self.plan(&guard, &context)?;
            let events = if wirings.is_empty() {
                Vec::new()
            } else {
                let mut db = RwLockUpgradableReadGuard::upgrade(guard);
                self.commit(&mut db, wirings)
            };
            (report, events)
        };
        self.emit(&events);
        Ok(report)
    }

    /// Unresolves `revisions` and everything wired to them, drops stale
    /// revisions, then resolves the current ones again. An empty set means
    /// every removal-pending revision.
    pub fn refresh(&self, revisions: &[RevisionId]) -> Result<ResolutionReport, ContainerError> {
        let (events, triggers) = {
            let mut db = self.db.write();
            if let Some(unknown) = revisions.iter().find(|id| db.revision(**id).is_none()) {
                return Err(ContainerError::UnknownRevision(*unknown));
            }
            let seeds: Vec<RevisionId> = if revisions.is_empty() {
                db.removal_pending().collect()
            } else {
                revisions.to_vec()
            };
            let closure = db.dependency_closure(&seeds);
            let mut events = Vec::new();
            for id in &closure {
                if db.unresolve(*id).is_some() {
                    events.push(WiringEvent::Unresolved(*id));
                }
            }
            for id in &closure {
                if !db.is_current(*id) {
                    debug!(revision = %id, "discarded on refresh");
                    db.discard(*id);
                }
            }
            let triggers: Vec<RevisionId> = closure
                .iter()
                .copied()
                .filter(|id| db.is_current(*id))
                .collect();
            (events, triggers)
        };
        self.misses.lock().clear();
        info!(unresolved = events.len(), "refreshed");
        self.emit(&events);
        self.resolve(&triggers, false)
    }

    pub fn resolve_dynamic(
        &self,
        package: &str,
        revision: RevisionId,
    ) -> Result<Option<Wire>, ContainerError> {
        self.resolve_dynamic_with_report(package, revision)
            .map(|(wire, _)| wire)
    }

    /// Binds `package` for an already resolved revision through one of its dynamic imports.
    pub fn resolve_dynamic_with_report(
        &self,
        package: &str,
        revision: RevisionId,
    ) -> Result<(Option<Wire>, ResolutionReport), ContainerError> {
        let mut report = ResolutionReport::new();
        let mut events = Vec::new();

        let wire = {
            let mut guard = self.db.upgradable_read();
            let Some(wiring) = guard.wiring(revision).cloned() else {
                return Err(match guard.revision(revision) {
                    Some(_) => ContainerError::NotResolved(revision),
                    None => ContainerError::UnknownRevision(revision),
                });
            };
            let caching = self.config.resolver.dynamic_miss_cache;
            if caching && self.misses.lock().contains(revision, package) {
                trace!(%revision, package, "dynamic miss cached");
                return Ok((None, report));
            }
            if dynamic::is_visible(&wiring, package) {
                return Ok((None, report));
            }

            let declared: Vec<Arc<Requirement>> =
                dynamic::dynamic_requirements(&wiring).cloned().collect();
            let mut found = None;
            let mut had_candidates = false;
            let mut unsatisfied: IndexMap<EntryType, Vec<UnsatisfiedRequirement>> =
                IndexMap::new();
            for requirement in &declared {
                let synthetic = Arc::new(dynamic::synthesize(requirement, package)?);
                let index = CandidateIndex::build(&guard, &self.policy, &self.config.resolver);
                let lookup = {
                    let mut hooks = HookChain::begin(&self.hooks, &[revision]);
                    dynamic::candidates(&guard, &index, &mut hooks, &synthetic)?
                };
                had_candidates |= !lookup.matching.is_empty();
                let kind = lookup.entry_type();
                for candidate in lookup.candidates {
                    if !guard.is_resolved(candidate.provider) {
                        let context = ResolutionContext::new([candidate.provider], false);
                        let Resolution { wirings, report: provider_report } =
                            self.plan(&guard, &context)?;
                        report.merge(provider_report);
                        if !wirings.is_empty() {
                            let mut db = RwLockUpgradableReadGuard::upgrade(guard);
                            events.extend(self.commit(&mut db, wirings));
                            guard = RwLockWriteGuard::downgrade_to_upgradable(db);
                        }
                    }
                    let provides = guard.wiring(candidate.provider).is_some_and(|w| {
                        w.capabilities
                            .iter()
                            .any(|c| Arc::ptr_eq(c, &candidate.capability))
                    });
                    if provides {
                        found = Some(Wire::new(
                            revision,
                            synthetic.clone(),
                            candidate.provider,
                            candidate.capability,
                        ));
                        break;
                    }
                }
                if found.is_some() {
                    break;
                }
                unsatisfied.entry(kind).or_default().push(UnsatisfiedRequirement {
                    requirement: synthetic,
                    candidates: lookup.matching,
                });
            }

            match found {
                Some(wire) => {
                    let mut db = RwLockUpgradableReadGuard::upgrade(guard);
                    if let Some(current) = db.wiring(revision).cloned() {
                        db.commit_wiring(current.with_wire(wire.clone()));
                    }
                    info!(%wire, "dynamic wire added");
                    Some(wire)
                }
                None => {
                    if caching {
                        self.misses.lock().record(revision, package, had_candidates);
                    }
                    for (kind, requirements) in unsatisfied {
                        let message = match kind {
                            EntryType::FilteredByHook => format!(
                                "every provider of dynamic import {} was removed by a resolver hook",
                                package
                            ),
                            EntryType::UnresolvedProvider => format!(
                                "no provider of dynamic import {} could be resolved",
                                package
                            ),
                            _ => format!("no provider for dynamic import of {}", package),
                        };
                        report.add_entry(
                            revision,
                            ReportEntry::new(kind, EntryData::Requirements(requirements), message),
                        );
                    }
                    debug!(%revision, package, "dynamic resolution found nothing");
                    None
                }
            }
        };

        self.emit(&events);
        Ok((wire, report))
    }

    pub fn revision(&self, id: RevisionId) -> Option<Arc<Revision>> {
        self.db.read().revision(id).cloned()
    }

    pub fn wiring(&self, id: RevisionId) -> Option<Arc<Wiring>> {
        self.db.read().wiring(id).cloned()
    }

    /// Every committed wiring, by revision id.
    pub fn wirings(&self) -> Vec<Arc<Wiring>> {
        let mut wirings: Vec<Arc<Wiring>> = self.db.read().wirings().cloned().collect();
        wirings.sort_by_key(|w| w.revision);
        wirings
    }

    pub fn is_resolved(&self, id: RevisionId) -> bool {
        self.db.read().is_resolved(id)
    }

    /// Every installed revision, removal-pending ones included, in install order.
    pub fn revisions(&self) -> Vec<Arc<Revision>> {
        self.db.read().revisions().cloned().collect()
    }

    pub fn current_revision(&self, location: &str) -> Option<RevisionId> {
        self.db.read().current_revision(location)
    }

    pub fn removal_pending(&self) -> Vec<RevisionId> {
        self.db.read().removal_pending().collect()
    }

    pub fn unresolved(&self) -> Vec<RevisionId> {
        self.db.read().unresolved_current().map(|r| r.id).collect()
    }
}
