pub mod database;
pub mod dynamic;
pub mod hooks;
pub mod index;
pub mod namespace;
pub mod report;
pub mod resolver;

pub use database::ModuleDatabase;
pub use hooks::{HookChain, HookError, ResolverHook, ResolverHookFactory, Shrinkable};
pub use index::{Candidate, CandidateIndex};
pub use namespace::{Namespace, NamespacePolicy};
pub use report::{EntryData, EntryType, ReportEntry, ResolutionReport, UnsatisfiedRequirement};
pub use resolver::{Resolution, ResolutionContext, ResolveError, Resolver};
