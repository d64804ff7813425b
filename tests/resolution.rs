mod support;

use pretty_assertions::assert_eq;

use modwire::models::{
    CapabilityDescriptor, BUNDLE_NAMESPACE, EXECUTION_ENVIRONMENT_NAMESPACE, PACKAGE_NAMESPACE,
};
use modwire::{ContainerConfig, EntryData, EntryType, RevisionDescriptor, WiringEvent};

use support::{container, install, package_provider, providers, recording_container};

#[test]
fn test_import_wires_to_exporter() {
    let container = container();
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    let report = container.resolve(&[a], false).unwrap();

    assert!(report.is_empty());
    assert!(container.is_resolved(a));
    assert!(container.is_resolved(b));
    assert_eq!(package_provider(&container, a, "pkg1"), Some(b));
    assert_eq!(report.resolved, vec![a, b]);
}

#[test]
fn test_missing_capability_is_reported() {
    let container = container();
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("nowhere", None));

    let report = container.resolve(&[a], false).unwrap();

    assert!(!container.is_resolved(a));
    assert!(report.has_entry(a, EntryType::MissingCapability));
    assert_eq!(report.summary(), "1 missing capability");
    let entry = &report.entries_for(a)[0];
    assert_eq!(entry.unsatisfied().len(), 1);
    assert!(entry.unsatisfied()[0].candidates.is_empty());
}

#[test]
fn test_unresolved_provider_is_reported() {
    let container = container();
    install(
        &container,
        RevisionDescriptor::bundle("b", "1.0")
            .export("pkg1", "1.0")
            .import("nowhere", None),
    );
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    let report = container.resolve(&[a], false).unwrap();

    assert!(report.has_entry(a, EntryType::UnresolvedProvider));
    let entry = &report.entries_for(a)[0];
    assert_eq!(entry.unsatisfied()[0].candidates.len(), 1);
}

#[test]
fn test_optional_import_does_not_block() {
    let container = container();
    let a = install(
        &container,
        RevisionDescriptor::bundle("a", "1.0").import_optional("nowhere", None),
    );

    let report = container.resolve(&[a], false).unwrap();

    assert!(report.is_empty());
    assert!(container.is_resolved(a));
    assert_eq!(package_provider(&container, a, "nowhere"), None);
}

#[test]
fn test_resolving_twice_is_a_no_op() {
    let (container, events) = recording_container(ContainerConfig::default());
    install(&container, RevisionDescriptor::bundle("b", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    container.resolve(&[a], false).unwrap();
    let committed = events.lock().len();
    let before = container.wiring(a).unwrap();

    let again = container.resolve(&[a], false).unwrap();

    assert!(again.is_empty());
    assert!(again.resolved.is_empty());
    assert_eq!(events.lock().len(), committed);
    assert!(std::sync::Arc::ptr_eq(&before, &container.wiring(a).unwrap()));
}

#[test]
fn test_highest_version_is_preferred() {
    let container = container();
    install(&container, RevisionDescriptor::bundle("low", "1.0").export("pkg1", "1.0"));
    let high = install(&container, RevisionDescriptor::bundle("high", "1.0").export("pkg1", "1.5"));
    let a = install(
        &container,
        RevisionDescriptor::bundle("a", "1.0").import("pkg1", Some("[1.0,2.0)")),
    );

    container.resolve(&[a], false).unwrap();

    assert_eq!(package_provider(&container, a, "pkg1"), Some(high));
}

#[test]
fn test_resolved_provider_is_preferred_over_newer() {
    let container = container();
    let old = install(&container, RevisionDescriptor::bundle("old", "1.0").export("pkg1", "1.0"));
    container.resolve(&[old], false).unwrap();
    install(&container, RevisionDescriptor::bundle("new", "1.0").export("pkg1", "2.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));

    container.resolve(&[a], false).unwrap();

    assert_eq!(package_provider(&container, a, "pkg1"), Some(old));
}

#[test]
fn test_singleton_highest_version_wins_when_resolved_together() {
    let container = container();
    let v1 = install(&container, RevisionDescriptor::bundle("s", "1.0").singleton());
    let v2 = install(&container, RevisionDescriptor::bundle("s", "2.0").singleton());

    let report = container.resolve(&[v1, v2], false).unwrap();

    assert!(container.is_resolved(v2));
    assert!(!container.is_resolved(v1));
    assert!(report.has_entry(v1, EntryType::SingletonSelection));
    match &report.entries_for(v1)[0].data {
        EntryData::Singleton { selected, rejected } => {
            assert_eq!(*selected, v2);
            assert_eq!(rejected, &vec![v1]);
        }
        other => panic!("unexpected entry data {:?}", other),
    }
}

#[test]
fn test_resolved_singleton_stays_selected() {
    let container = container();
    let v1 = install(&container, RevisionDescriptor::bundle("s", "1.0").singleton());
    container.resolve(&[v1], false).unwrap();
    let v2 = install(&container, RevisionDescriptor::bundle("s", "2.0").singleton());

    let report = container.resolve(&[v2], false).unwrap();

    assert!(container.is_resolved(v1));
    assert!(!container.is_resolved(v2));
    assert!(report.has_entry(v2, EntryType::SingletonSelection));
}

#[test]
fn test_singleton_outside_the_call_does_not_compete() {
    let container = container();
    let v1 = install(&container, RevisionDescriptor::bundle("s", "1.0").singleton());
    let v2 = install(&container, RevisionDescriptor::bundle("s", "2.0").singleton());

    let report = container.resolve(&[v1], false).unwrap();

    assert!(report.is_empty());
    assert!(container.is_resolved(v1));
    assert!(!container.is_resolved(v2));

    let later = container.resolve(&[v2], false).unwrap();
    assert!(!container.is_resolved(v2));
    assert!(later.has_entry(v2, EntryType::SingletonSelection));
}

#[test]
fn test_non_singletons_of_one_name_coexist() {
    let container = container();
    let v1 = install(&container, RevisionDescriptor::bundle("s", "1.0"));
    let v2 = install(&container, RevisionDescriptor::bundle("s", "2.0"));

    let report = container.resolve(&[v1, v2], false).unwrap();

    assert!(report.is_empty());
    assert!(container.is_resolved(v1) && container.is_resolved(v2));
}

#[test]
fn test_multiple_cardinality_wires_every_match() {
    let container = container();
    let codec = |name: &str| {
        RevisionDescriptor::bundle(name, "1.0").capability(
            CapabilityDescriptor::new("acme.plugin").attribute("type", "codec"),
        )
    };
    let first = install(&container, codec("gzip"));
    let second = install(&container, codec("zstd"));
    install(
        &container,
        RevisionDescriptor::bundle("other", "1.0")
            .capability(CapabilityDescriptor::new("acme.plugin").attribute("type", "store")),
    );
    let host = install(
        &container,
        RevisionDescriptor::bundle("host", "1.0").require_multiple("acme.plugin", "(type=codec)"),
    );

    container.resolve(&[host], false).unwrap();

    assert_eq!(providers(&container, host, "acme.plugin"), vec![first, second]);
}

#[test]
fn test_require_bundle_sees_reexported_packages() {
    let container = container();
    let base = install(&container, RevisionDescriptor::bundle("base", "1.0").export("base.api", "1.0"));
    let facade = install(
        &container,
        RevisionDescriptor::bundle("facade", "1.0").require_bundle("base", None, true),
    );
    let app = install(
        &container,
        RevisionDescriptor::bundle("app", "1.0").require_bundle("facade", Some("[1.0,2.0)"), false),
    );

    let report = container.resolve(&[app], false).unwrap();

    assert!(report.is_empty());
    assert_eq!(providers(&container, app, BUNDLE_NAMESPACE), vec![facade]);
    assert_eq!(providers(&container, facade, BUNDLE_NAMESPACE), vec![base]);
}

#[test]
fn test_execution_environment_from_system_revision() {
    let container = container();
    let system = container.system_revision();
    let modern = install(
        &container,
        RevisionDescriptor::bundle("modern", "1.0").require_ee("(osgi.ee=JavaSE)"),
    );
    let exotic = install(
        &container,
        RevisionDescriptor::bundle("exotic", "1.0").require_ee("(osgi.ee=CDC/Foundation)"),
    );

    let report = container.resolve(&[modern, exotic], false).unwrap();

    assert_eq!(providers(&container, modern, EXECUTION_ENVIRONMENT_NAMESPACE), vec![system]);
    assert!(report.has_entry(exotic, EntryType::MissingCapability));
}

#[test]
fn test_uses_conflict_rebinds_most_recent_choice() {
    let container = container();
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").export("q", "1.0"));
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("q", "2.0"));
    let c = install(
        &container,
        RevisionDescriptor::bundle("c", "1.0")
            .export_uses("p", "1.0", &["q"])
            .import("q", Some("[1.0,2.0)")),
    );
    let d = install(
        &container,
        RevisionDescriptor::bundle("d", "1.0")
            .import("p", None)
            .import("q", None),
    );

    let report = container.resolve(&[d], false).unwrap();

    assert!(report.is_empty());
    assert_eq!(package_provider(&container, c, "q"), Some(a));
    assert_eq!(package_provider(&container, d, "p"), Some(c));
    assert_eq!(package_provider(&container, d, "q"), Some(a));
    assert!(container.is_resolved(b));
}

#[test]
fn test_unrepairable_uses_conflict_is_reported() {
    let container = container();
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").export("q", "1.0"));
    install(&container, RevisionDescriptor::bundle("b", "1.0").export("q", "2.0"));
    install(
        &container,
        RevisionDescriptor::bundle("c", "1.0")
            .export_uses("p", "1.0", &["q"])
            .import("q", Some("[1.0,2.0)")),
    );
    let d = install(
        &container,
        RevisionDescriptor::bundle("d", "1.0")
            .import("p", None)
            .import("q", Some("[2.0,3.0)")),
    );

    let report = container.resolve(&[d], false).unwrap();

    assert!(!container.is_resolved(d));
    assert!(report.has_entry(d, EntryType::UsesConstraintViolation));
    assert_eq!(package_provider(&container, d, "q"), None);
    assert!(container.wiring(a).is_some());
}

#[test]
fn test_substitutable_export_prefers_existing_provider() {
    let container = container();
    let lib = install(&container, RevisionDescriptor::bundle("lib", "1.0").export("api", "1.0"));
    container.resolve(&[lib], false).unwrap();
    let app = install(
        &container,
        RevisionDescriptor::bundle("app", "1.0")
            .export("api", "1.0")
            .import("api", None),
    );

    container.resolve(&[app], false).unwrap();

    let wiring = container.wiring(app).unwrap();
    assert_eq!(package_provider(&container, app, "api"), Some(lib));
    assert!(wiring.exported_package("api").is_none());
    assert_eq!(wiring.substituted.len(), 1);
}

#[test]
fn test_substitutable_export_alone_wires_to_itself() {
    let container = container();
    let app = install(
        &container,
        RevisionDescriptor::bundle("app", "1.0")
            .export("api", "1.0")
            .import("api", None),
    );

    container.resolve(&[app], false).unwrap();

    let wiring = container.wiring(app).unwrap();
    assert_eq!(package_provider(&container, app, "api"), Some(app));
    assert!(wiring.exported_package("api").is_some());
}

#[test]
fn test_mandatory_rolls_back_every_trigger() {
    let container = container();
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));
    let c = install(&container, RevisionDescriptor::bundle("c", "1.0").import("nowhere", None));

    let report = container.resolve(&[a, c], true).unwrap();

    assert!(!container.is_resolved(a));
    assert!(!container.is_resolved(c));
    assert!(container.is_resolved(b));
    assert!(report.has_entry(c, EntryType::MissingCapability));
    assert!(report.entries_for(a).is_empty());

    let partial = container.resolve(&[a, c], false).unwrap();
    assert!(container.is_resolved(a));
    assert!(partial.has_entry(c, EntryType::MissingCapability));
}

#[test]
fn test_rolled_back_provider_leaves_own_export_in_place() {
    let container = container();
    let a = install(
        &container,
        RevisionDescriptor::bundle("a", "1.0")
            .export("p", "1.0")
            .import("p", None)
            .export("r", "1.0"),
    );
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("p", "2.0"));
    let c = install(&container, RevisionDescriptor::bundle("c", "1.0").import("r", None));
    let x = install(&container, RevisionDescriptor::bundle("x", "1.0").import("nowhere", None));

    let report = container.resolve(&[c, b, x], true).unwrap();

    assert!(report.has_entry(x, EntryType::MissingCapability));
    assert!(!container.is_resolved(b));
    assert!(!container.is_resolved(c));
    assert!(container.is_resolved(a));
    assert!(report.entries_for(a).is_empty());
    assert_eq!(package_provider(&container, a, "p"), Some(a));
    assert!(container.wiring(a).unwrap().exported_package("p").is_some());
}

#[test]
fn test_events_follow_commit_order() {
    let (container, events) = recording_container(ContainerConfig::default());
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("pkg1", "1.0"));
    let a = install(&container, RevisionDescriptor::bundle("a", "1.0").import("pkg1", None));
    events.lock().clear();

    container.resolve(&[a], false).unwrap();

    assert_eq!(
        *events.lock(),
        vec![WiringEvent::Resolved(a), WiringEvent::Resolved(b)]
    );
}

#[test]
fn test_unknown_trigger_is_an_error() {
    let container = container();
    let error = container
        .resolve(&[modwire::RevisionId(999)], false)
        .unwrap_err();
    assert!(error.to_string().contains("r999"));
}

#[test]
fn test_malformed_filter_fails_only_that_call() {
    let container = container();
    let b = install(&container, RevisionDescriptor::bundle("b", "1.0").export("pkg1", "1.0"));
    container.resolve(&[b], false).unwrap();
    let broken = install(
        &container,
        RevisionDescriptor::bundle("broken", "1.0").require_multiple("acme.plugin", "(type=codec"),
    );

    assert!(container.resolve(&[broken], false).is_err());
    assert!(container.is_resolved(b));
    assert_eq!(providers(&container, b, PACKAGE_NAMESPACE), Vec::new());
}

#[test]
fn test_demo_universe_resolves() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/universe.yaml");
    let universe = modwire::UniverseDescriptor::load(&path).unwrap();
    let container = container();
    let ids: Vec<_> = universe
        .revisions
        .into_iter()
        .map(|descriptor| install(&container, descriptor))
        .collect();

    let report = container.resolve(&ids, false).unwrap();

    assert!(report.is_empty(), "{}", report);
    let (log, store, nls, app) = (ids[0], ids[1], ids[2], ids[3]);
    assert_eq!(package_provider(&container, store, "org.acme.log.api"), Some(log));
    assert_eq!(package_provider(&container, app, "org.acme.store.api"), Some(store));
    assert_eq!(container.wiring(store).unwrap().fragments, vec![nls]);
}
