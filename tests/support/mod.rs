#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use modwire::{
    Container, ContainerConfig, ResolverHook, ResolverHookFactory, RevisionDescriptor, RevisionId,
    WiringEvent,
};

pub fn container() -> Container {
    Container::new().expect("default container builds")
}

pub fn install(container: &Container, descriptor: RevisionDescriptor) -> RevisionId {
    container
        .install(descriptor)
        .expect("descriptor installs")
}

/// Providers the committed wiring of `revision` is wired to, in wire order.
pub fn providers(container: &Container, revision: RevisionId, namespace: &str) -> Vec<RevisionId> {
    container
        .wiring(revision)
        .map(|wiring| wiring.wires_in(namespace).map(|w| w.provider).collect())
        .unwrap_or_default()
}

pub fn package_provider(
    container: &Container,
    revision: RevisionId,
    package: &str,
) -> Option<RevisionId> {
    container
        .wiring(revision)?
        .package_wire(package)
        .map(|w| w.provider)
}

/// A container whose wiring events are collected into the returned log.
pub fn recording_container(config: ContainerConfig) -> (Container, Arc<Mutex<Vec<WiringEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let container = Container::builder(config)
        .listener(move |event: &WiringEvent| sink.lock().push(*event))
        .build()
        .expect("container builds");
    (container, events)
}

pub fn hook_factory<H>(make: fn() -> H) -> impl ResolverHookFactory
where
    H: ResolverHook + 'static,
{
    move |_: &[RevisionId]| Box::new(make()) as Box<dyn ResolverHook>
}
