//! A dynamic module container.
//!
//! Revisions declare capabilities and requirements in namespaces; the resolver
//! wires every mandatory requirement of a revision to a capability of some
//! provider, honoring singletons, fragments and package-space consistency.
//! [`Container`] owns the installed universe and applies resolution results.

pub mod config;
pub mod container;
pub mod core;
pub mod models;

pub use config::{ContainerConfig, ResolverConfig, SystemConfig};
pub use container::{Container, ContainerBuilder, ContainerError, WiringEvent, WiringListener};
pub use crate::core::{
    EntryData, EntryType, ReportEntry, ResolutionReport, ResolverHook, ResolverHookFactory,
    Shrinkable,
};
pub use models::{
    Capability, Requirement, Revision, RevisionDescriptor, RevisionId, UniverseDescriptor,
    Version, VersionRange, Wire, Wiring,
};
