mod attribute;
mod descriptor;
mod filter;
mod version;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub use attribute::AttributeValue;
pub use descriptor::{
    CapabilityDescriptor, DescriptorError, RequirementDescriptor, RevisionDescriptor,
    UniverseDescriptor,
};
pub use filter::{Comparison, Filter, FilterError};
pub use version::{Version, VersionError, VersionRange};

pub const PACKAGE_NAMESPACE: &str = "osgi.wiring.package";
pub const BUNDLE_NAMESPACE: &str = "osgi.wiring.bundle";
pub const HOST_NAMESPACE: &str = "osgi.wiring.host";
pub const IDENTITY_NAMESPACE: &str = "osgi.identity";
pub const EXECUTION_ENVIRONMENT_NAMESPACE: &str = "osgi.ee";
pub const NATIVE_NAMESPACE: &str = "osgi.native";

pub const VERSION_ATTRIBUTE: &str = "version";
pub const BUNDLE_VERSION_ATTRIBUTE: &str = "bundle-version";
pub const BUNDLE_SYMBOLIC_NAME_ATTRIBUTE: &str = "bundle-symbolic-name";
pub const IDENTITY_TYPE_ATTRIBUTE: &str = "type";

pub const RESOLUTION_DIRECTIVE: &str = "resolution";
pub const CARDINALITY_DIRECTIVE: &str = "cardinality";
pub const VISIBILITY_DIRECTIVE: &str = "visibility";
pub const EFFECTIVE_DIRECTIVE: &str = "effective";
pub const USES_DIRECTIVE: &str = "uses";
pub const MANDATORY_DIRECTIVE: &str = "mandatory";
pub const SINGLETON_DIRECTIVE: &str = "singleton";
pub const FRAGMENT_ATTACHMENT_DIRECTIVE: &str = "fragment-attachment";

/// Opaque identity of one installed revision; ordered by installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub u64);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Mandatory,
    Optional,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Private,
    Reexport,
}

fn split_list(value: Option<&String>) -> Vec<&str> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn is_effective(directives: &IndexMap<String, String>) -> bool {
    directives
        .get(EFFECTIVE_DIRECTIVE)
        .map_or(true, |e| e == "resolve")
}

/// A typed fact a revision provides.
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub namespace: String,
    pub attributes: IndexMap<String, AttributeValue>,
    pub directives: IndexMap<String, String>,
    pub owner: RevisionId,
    /// Position in the owner's declared capability list.
    #[serde(skip)]
    pub ordinal: usize,
}

impl Capability {
    /// The value of the attribute named after the namespace, e.g. the package name.
    pub fn name(&self) -> Option<&str> {
        self.attributes
            .get(&self.namespace)
            .and_then(AttributeValue::as_str)
    }

    pub fn version_of(&self, attribute: &str) -> Version {
        self.attributes
            .get(attribute)
            .and_then(AttributeValue::as_version)
            .cloned()
            .unwrap_or_default()
    }

    pub fn uses(&self) -> Vec<&str> {
        split_list(self.directives.get(USES_DIRECTIVE))
    }

    pub fn mandatory_attributes(&self) -> Vec<&str> {
        split_list(self.directives.get(MANDATORY_DIRECTIVE))
    }

    pub fn is_effective(&self) -> bool {
        is_effective(&self.directives)
    }

    pub fn key(&self) -> CapabilityKey {
        CapabilityKey {
            owner: self.owner,
            ordinal: self.ordinal,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace)?;
        for (name, value) in &self.attributes {
            write!(f, "; {}={}", name, value)?;
        }
        write!(f, " [{}]", self.owner)
    }
}

/// Stable handle on a capability, usable as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityKey {
    pub owner: RevisionId,
    pub ordinal: usize,
}

/// A filtered need a revision declares against other revisions' capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct Requirement {
    pub namespace: String,
    #[serde(rename = "filter", skip_serializing_if = "Option::is_none")]
    pub filter_text: Option<String>,
    pub directives: IndexMap<String, String>,
    pub owner: RevisionId,
    #[serde(skip)]
    pub ordinal: usize,
    #[serde(skip)]
    parsed: OnceCell<Result<Option<Filter>, FilterError>>,
}

impl Requirement {
    pub fn new(
        namespace: impl Into<String>,
        filter_text: Option<String>,
        directives: IndexMap<String, String>,
        owner: RevisionId,
        ordinal: usize,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            filter_text,
            directives,
            owner,
            ordinal,
            parsed: OnceCell::new(),
        }
    }

    /// Requirement whose filter is already parsed, e.g. a synthesized one.
    pub fn with_filter(
        namespace: impl Into<String>,
        filter: Filter,
        directives: IndexMap<String, String>,
        owner: RevisionId,
        ordinal: usize,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            filter_text: Some(filter.to_string()),
            directives,
            owner,
            ordinal,
            parsed: OnceCell::with_value(Ok(Some(filter))),
        }
    }

    /// The parsed match filter, parsed on first use.
    pub fn filter(&self) -> Result<Option<&Filter>, FilterError> {
        let parsed = self.parsed.get_or_init(|| {
            self.filter_text
                .as_deref()
                .map(Filter::parse)
                .transpose()
        });
        match parsed {
            Ok(filter) => Ok(filter.as_ref()),
            Err(e) => Err(e.clone()),
        }
    }

    pub fn resolution(&self) -> Resolution {
        match self.directives.get(RESOLUTION_DIRECTIVE).map(String::as_str) {
            Some("optional") => Resolution::Optional,
            Some("dynamic") => Resolution::Dynamic,
            _ => Resolution::Mandatory,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.resolution() == Resolution::Optional
    }

    pub fn cardinality(&self) -> Cardinality {
        match self.directives.get(CARDINALITY_DIRECTIVE).map(String::as_str) {
            Some("multiple") => Cardinality::Multiple,
            _ => Cardinality::Single,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self.directives.get(VISIBILITY_DIRECTIVE).map(String::as_str) {
            Some("reexport") => Visibility::Reexport,
            _ => Visibility::Private,
        }
    }

    pub fn is_effective(&self) -> bool {
        is_effective(&self.directives)
    }

    pub fn key(&self) -> RequirementKey {
        RequirementKey {
            owner: self.owner,
            ordinal: self.ordinal,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.namespace,
            self.filter_text.as_deref().unwrap_or("(*)"),
            self.owner
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequirementKey {
    pub owner: RevisionId,
    pub ordinal: usize,
}

/// One immutable, versioned candidate unit of code.
#[derive(Debug, Clone, Serialize)]
pub struct Revision {
    pub id: RevisionId,
    pub location: String,
    pub symbolic_name: String,
    pub version: Version,
    pub capabilities: Vec<Arc<Capability>>,
    pub requirements: Vec<Arc<Requirement>>,
    pub is_fragment: bool,
    pub is_singleton: bool,
}

impl Revision {
    pub fn capabilities_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Arc<Capability>> + 'a {
        self.capabilities
            .iter()
            .filter(move |c| c.namespace == namespace)
    }

    pub fn requirements_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Arc<Requirement>> + 'a {
        self.requirements
            .iter()
            .filter(move |r| r.namespace == namespace)
    }

    pub fn identity(&self) -> Option<&Arc<Capability>> {
        self.capabilities_in(IDENTITY_NAMESPACE).next()
    }

    /// The host requirement of a fragment.
    pub fn host_requirement(&self) -> Option<&Arc<Requirement>> {
        if !self.is_fragment {
            return None;
        }
        self.requirements_in(HOST_NAMESPACE).next()
    }

    pub fn exports_package(&self, package: &str) -> bool {
        self.capabilities_in(PACKAGE_NAMESPACE)
            .any(|c| c.name() == Some(package))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{} ({})", self.symbolic_name, self.version, self.id)
    }
}

/// A binding of one requirement to one capability.
#[derive(Debug, Clone, Serialize)]
pub struct Wire {
    pub requirer: RevisionId,
    pub requirement: Arc<Requirement>,
    pub provider: RevisionId,
    pub capability: Arc<Capability>,
}

impl Wire {
    pub(crate) fn new(
        requirer: RevisionId,
        requirement: Arc<Requirement>,
        provider: RevisionId,
        capability: Arc<Capability>,
    ) -> Self {
        debug_assert_eq!(requirement.namespace, capability.namespace);
        Self {
            requirer,
            requirement,
            provider,
            capability,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.capability.namespace
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}{})",
            self.requirer,
            self.provider,
            self.capability.namespace,
            self.capability
                .name()
                .map(|n| format!(" {}", n))
                .unwrap_or_default()
        )
    }
}

/// The committed view of one resolved revision.
#[derive(Debug, Clone, Serialize)]
pub struct Wiring {
    pub revision: RevisionId,
    pub capabilities: Vec<Arc<Capability>>,
    pub requirements: Vec<Arc<Requirement>>,
    pub required_wires: Vec<Wire>,
    /// Fragments merged into this host.
    pub fragments: Vec<RevisionId>,
    /// Own exports replaced by an imported provider.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub substituted: Vec<Arc<Capability>>,
}

impl Wiring {
    pub fn wires_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Wire> + 'a {
        self.required_wires
            .iter()
            .filter(move |w| w.namespace() == namespace)
    }

    pub fn package_wire(&self, package: &str) -> Option<&Wire> {
        self.wires_in(PACKAGE_NAMESPACE)
            .find(|w| w.capability.name() == Some(package))
    }

    pub fn exported_package(&self, package: &str) -> Option<&Arc<Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.namespace == PACKAGE_NAMESPACE && c.name() == Some(package))
    }

    pub fn depends_on(&self, provider: RevisionId) -> bool {
        self.required_wires.iter().any(|w| w.provider == provider)
    }

    /// A copy with one more required wire.
    pub fn with_wire(&self, wire: Wire) -> Wiring {
        let mut wiring = self.clone();
        if !wiring
            .requirements
            .iter()
            .any(|r| Arc::ptr_eq(r, &wire.requirement))
        {
            wiring.requirements.push(wire.requirement.clone());
        }
        wiring.required_wires.push(wire);
        wiring
    }
}
