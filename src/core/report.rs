use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::models::{Capability, Requirement, RevisionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// No capability ever matched the requirement.
    MissingCapability,
    /// Matching capabilities existed but none of their providers could resolve.
    UnresolvedProvider,
    /// A resolver hook removed the revision or every candidate.
    FilteredByHook,
    /// Lost a singleton collision.
    SingletonSelection,
    /// Every remaining candidate led to inconsistent package providers.
    UsesConstraintViolation,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::MissingCapability => "missing capability",
            EntryType::UnresolvedProvider => "unresolved provider",
            EntryType::FilteredByHook => "filtered by hook",
            EntryType::SingletonSelection => "singleton selection",
            EntryType::UsesConstraintViolation => "uses constraint violation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnsatisfiedRequirement {
    pub requirement: Arc<Requirement>,
    /// Capabilities that would have satisfied it.
    pub candidates: Vec<Arc<Capability>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntryData {
    None,
    Requirements(Vec<UnsatisfiedRequirement>),
    Singleton {
        selected: RevisionId,
        rejected: Vec<RevisionId>,
    },
    UsesConflict {
        package: String,
        providers: Vec<RevisionId>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub kind: EntryType,
    pub data: EntryData,
    pub message: String,
}

impl ReportEntry {
    pub fn new(kind: EntryType, data: EntryData, message: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            message: message.into(),
        }
    }

    /// The requirement/candidates pairs, when this entry carries them.
    pub fn unsatisfied(&self) -> &[UnsatisfiedRequirement] {
        match &self.data {
            EntryData::Requirements(requirements) => requirements,
            _ => &[],
        }
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one resolve call: what got committed and why the rest did not.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ResolutionReport {
    /// Newly committed revisions, in commit order.
    pub resolved: Vec<RevisionId>,
    pub entries: IndexMap<RevisionId, Vec<ReportEntry>>,
}

impl ResolutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, revision: RevisionId, entry: ReportEntry) {
        self.entries.entry(revision).or_default().push(entry);
    }

    /// True when no entries were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_for(&self, revision: RevisionId) -> &[ReportEntry] {
        self.entries
            .get(&revision)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_entry(&self, revision: RevisionId, kind: EntryType) -> bool {
        self.entries_for(revision).iter().any(|e| e.kind == kind)
    }

    pub fn count(&self, kind: EntryType) -> usize {
        self.entries
            .values()
            .flatten()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Folds `other` into this report, keeping commit order.
    pub fn merge(&mut self, other: ResolutionReport) {
        for id in other.resolved {
            if !self.resolved.contains(&id) {
                self.resolved.push(id);
            }
        }
        for (revision, entries) in other.entries {
            self.entries.entry(revision).or_default().extend(entries);
        }
    }

    /// Returns a summary of the resolution results
    pub fn summary(&self) -> String {
        let mut summary = Vec::new();

        if !self.resolved.is_empty() {
            summary.push(format!("Resolved {} revisions", self.resolved.len()));
        }

        for kind in [
            EntryType::MissingCapability,
            EntryType::UnresolvedProvider,
            EntryType::FilteredByHook,
            EntryType::SingletonSelection,
            EntryType::UsesConstraintViolation,
        ] {
            let count = self.count(kind);
            if count > 0 {
                summary.push(format!("{} {}", count, kind));
            }
        }

        if summary.is_empty() {
            "Nothing to resolve".to_string()
        } else {
            summary.join(", ")
        }
    }
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for (revision, entries) in &self.entries {
            for entry in entries {
                writeln!(f, "  - {}: {}", revision, entry)?;
                for unsatisfied in entry.unsatisfied() {
                    writeln!(f, "      requirement {}", unsatisfied.requirement)?;
                    for candidate in &unsatisfied.candidates {
                        writeln!(f, "        candidate {}", candidate)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let mut report = ResolutionReport::new();
        assert_eq!(report.summary(), "Nothing to resolve");

        report.resolved.push(RevisionId(1));
        report.add_entry(
            RevisionId(2),
            ReportEntry::new(EntryType::MissingCapability, EntryData::None, "no provider"),
        );
        report.add_entry(
            RevisionId(3),
            ReportEntry::new(EntryType::MissingCapability, EntryData::None, "no provider"),
        );
        assert_eq!(report.summary(), "Resolved 1 revisions, 2 missing capability");
        assert!(report.has_entry(RevisionId(2), EntryType::MissingCapability));
        assert!(!report.has_entry(RevisionId(1), EntryType::MissingCapability));
    }

    #[test]
    fn test_merge_keeps_order_without_duplicates() {
        let mut first = ResolutionReport::new();
        first.resolved = vec![RevisionId(1), RevisionId(2)];
        let mut second = ResolutionReport::new();
        second.resolved = vec![RevisionId(2), RevisionId(3)];
        second.add_entry(
            RevisionId(4),
            ReportEntry::new(EntryType::SingletonSelection, EntryData::None, "lost"),
        );
        first.merge(second);
        assert_eq!(first.resolved, vec![RevisionId(1), RevisionId(2), RevisionId(3)]);
        assert_eq!(first.entries_for(RevisionId(4)).len(), 1);
    }
}
