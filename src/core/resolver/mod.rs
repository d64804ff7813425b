//! The fixed-point resolution engine.
//!
//! One [`Resolver::resolve`] call works on a snapshot of the module database:
//! revisions are pruned by hooks and singleton arbitration, every requirement
//! gets an ordered candidate list, and a binding table is rewritten until no
//! revision has an unsatisfied mandatory requirement and every package space is
//! uses-consistent. Nothing here mutates the database; the caller commits the
//! returned wirings.

mod session;
mod uses;

use std::collections::HashSet;

use tracing::debug;

use crate::config::ResolverConfig;
use crate::models::{FilterError, RevisionId, Wiring};

use super::database::ModuleDatabase;
use super::hooks::HookChain;
use super::index::CandidateIndex;
use super::report::ResolutionReport;

use session::Session;

/// Fatal error for one resolve call. Already committed wirings are untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown revision {0}")]
    UnknownRevision(RevisionId),
    #[error("Invalid requirement filter: {0}")]
    Filter(#[from] FilterError),
}

/// What one resolve call was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub triggers: Vec<RevisionId>,
    /// When set, either every trigger commits or none does.
    pub mandatory: bool,
}

impl ResolutionContext {
    pub fn new(triggers: impl IntoIterator<Item = RevisionId>, mandatory: bool) -> Self {
        let mut seen = HashSet::new();
        Self {
            triggers: triggers.into_iter().filter(|id| seen.insert(*id)).collect(),
            mandatory,
        }
    }
}

/// New wirings in commit order, plus the diagnostics for everything that did not resolve.
#[derive(Debug, Default)]
pub struct Resolution {
    pub wirings: Vec<Wiring>,
    pub report: ResolutionReport,
}

pub struct Resolver<'a> {
    db: &'a ModuleDatabase,
    index: &'a CandidateIndex,
    config: &'a ResolverConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(db: &'a ModuleDatabase, index: &'a CandidateIndex, config: &'a ResolverConfig) -> Self {
        Self { db, index, config }
    }

    pub fn resolve(
        &self,
        context: &ResolutionContext,
        hooks: &mut HookChain,
    ) -> Result<Resolution, ResolveError> {
        if let Some(unknown) = context
            .triggers
            .iter()
            .find(|id| self.db.revision(**id).is_none())
        {
            return Err(ResolveError::UnknownRevision(*unknown));
        }

        let pending: Vec<RevisionId> = context
            .triggers
            .iter()
            .copied()
            .filter(|id| !self.db.is_resolved(*id))
            .collect();
        if pending.is_empty() {
            debug!(triggers = context.triggers.len(), "all triggers already resolved");
            return Ok(Resolution::default());
        }

        Session::new(self.db, self.index, self.config, hooks, pending, context.mandatory).run()
    }
}
