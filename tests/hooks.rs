mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use modwire::core::HookError;
use modwire::{
    Capability, Container, ContainerConfig, EntryType, Requirement, ResolverHook, Revision,
    RevisionDescriptor, Shrinkable,
};

use support::{hook_factory, install, package_provider};

fn container_with(factory: impl modwire::ResolverHookFactory + 'static) -> Container {
    Container::builder(ContainerConfig::default())
        .hook(factory)
        .build()
        .unwrap()
}

/// Clears every candidate list, then reports failure.
struct Broken;

impl ResolverHook for Broken {
    fn filter_matches(
        &mut self,
        _requirement: &Requirement,
        candidates: &mut Shrinkable<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        candidates.clear();
        Err("policy service unavailable".into())
    }
}

/// Hides every capability owned by a revision named `blocked`.
struct HideBlocked;

impl ResolverHook for HideBlocked {
    fn filter_matches(
        &mut self,
        _requirement: &Requirement,
        candidates: &mut Shrinkable<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        candidates.retain(|c| {
            c.attributes
                .get("bundle-symbolic-name")
                .and_then(|v| v.as_str())
                != Some("blocked")
        });
        Ok(())
    }
}

struct Quarantine;

impl ResolverHook for Quarantine {
    fn filter_resolvable(
        &mut self,
        candidates: &mut Shrinkable<'_, Arc<Revision>>,
    ) -> Result<(), HookError> {
        candidates.retain(|r| !r.symbolic_name.starts_with("quarantine"));
        Ok(())
    }
}

struct AllowEverySingleton;

impl ResolverHook for AllowEverySingleton {
    fn filter_singleton_collisions(
        &mut self,
        _singleton: &Capability,
        collisions: &mut Shrinkable<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        collisions.clear();
        Ok(())
    }
}

#[test]
fn test_failing_hook_filters_nothing() {
    let container = container_with(hook_factory(|| Broken));
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    let report = container.resolve(&[a], false).unwrap();

    assert!(report.is_empty());
    assert_eq!(package_provider(&container, a, "pkg1"), Some(b));
}

#[test]
fn test_match_filter_falls_back_to_next_candidate() {
    let container = container_with(hook_factory(|| HideBlocked));
    install(&container, RevisionDescriptor::bundle("blocked", "1.0").export("pkg1", "2.0"));
    let allowed = install(&container, RevisionDescriptor::bundle("allowed", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    container.resolve(&[a], false).unwrap();

    assert_eq!(package_provider(&container, a, "pkg1"), Some(allowed));
}

#[test]
fn test_match_filter_removing_everything_is_reported() {
    let container = container_with(hook_factory(|| HideBlocked));
    install(&container, RevisionDescriptor::bundle("blocked", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    let report = container.resolve(&[a], false).unwrap();

    assert!(!container.is_resolved(a));
    assert!(report.has_entry(a, EntryType::FilteredByHook));
}

#[test]
fn test_dynamic_provider_hidden_by_hook_is_reported() {
    let container = container_with(hook_factory(|| HideBlocked));
    install(&container, RevisionDescriptor::bundle("blocked", "1.0").export("com.acme.impl", "1.0"));
    let late = install(
        &container,
        RevisionDescriptor::bundle("late", "1.0").import_dynamic("com.acme.*"),
    );
    container.resolve(&[late], false).unwrap();

    let (wire, report) = container
        .resolve_dynamic_with_report("com.acme.impl", late)
        .unwrap();

    assert!(wire.is_none());
    assert_eq!(report.entries_for(late).len(), 1);
    assert_eq!(report.entries_for(late)[0].kind, EntryType::FilteredByHook);
}

#[test]
fn test_resolvable_filter_excludes_trigger() {
    let container = container_with(hook_factory(|| Quarantine));
    let held = install(&container, RevisionDescriptor::bundle("quarantine.tool", "1.0"));
    let free = install(&container, RevisionDescriptor::bundle("tool", "1.0"));

    let report = container.resolve(&[held, free], false).unwrap();

    assert!(!container.is_resolved(held));
    assert!(container.is_resolved(free));
    assert_eq!(report.entries_for(held)[0].kind, EntryType::FilteredByHook);
}

#[test]
fn test_excluded_provider_is_reported_on_importer() {
    let container = container_with(hook_factory(|| Quarantine));
    let held = install(
        &container,
        RevisionDescriptor::bundle("quarantine.lib", "1.0").export("pkg1", "1.0"),
    );
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    let report = container.resolve(&[a], false).unwrap();

    assert!(!container.is_resolved(a));
    assert!(report.has_entry(a, EntryType::UnresolvedProvider));
    assert!(report.has_entry(held, EntryType::FilteredByHook));
}

#[test]
fn test_collision_hook_lets_singletons_coexist() {
    let container = container_with(hook_factory(|| AllowEverySingleton));
    let v1 = install(&container, RevisionDescriptor::bundle("s", "1.0").singleton());
    let v2 = install(&container, RevisionDescriptor::bundle("s", "2.0").singleton());

    let report = container.resolve(&[v1, v2], false).unwrap();

    assert!(report.is_empty());
    assert!(container.is_resolved(v1) && container.is_resolved(v2));
}

#[test]
fn test_hooks_end_once_per_call() {
    static ENDED: AtomicUsize = AtomicUsize::new(0);

    struct Counting;

    impl ResolverHook for Counting {
        fn end(&mut self) {
            ENDED.fetch_add(1, Ordering::SeqCst);
        }
    }

    let container = container_with(hook_factory(|| Counting));
    let after_build = ENDED.load(Ordering::SeqCst);
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0"));
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0"));

    container.resolve(&[a], false).unwrap();
    container.resolve(&[b], false).unwrap();

    assert_eq!(ENDED.load(Ordering::SeqCst), after_build + 2);
}
