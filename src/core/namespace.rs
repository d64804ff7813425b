//! Per-namespace matching rules.

use std::fmt;

use crate::config::ResolverConfig;
use crate::models::{
    Capability, FilterError, Requirement, BUNDLE_NAMESPACE, BUNDLE_VERSION_ATTRIBUTE,
    EXECUTION_ENVIRONMENT_NAMESPACE, FRAGMENT_ATTACHMENT_DIRECTIVE, HOST_NAMESPACE,
    IDENTITY_NAMESPACE, NATIVE_NAMESPACE, PACKAGE_NAMESPACE, VERSION_ATTRIBUTE,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Package,
    Bundle,
    Host,
    Identity,
    ExecutionEnvironment,
    NativeCode,
    Generic(String),
}

impl Namespace {
    pub fn of(name: &str) -> Self {
        match name {
            PACKAGE_NAMESPACE => Namespace::Package,
            BUNDLE_NAMESPACE => Namespace::Bundle,
            HOST_NAMESPACE => Namespace::Host,
            IDENTITY_NAMESPACE => Namespace::Identity,
            EXECUTION_ENVIRONMENT_NAMESPACE => Namespace::ExecutionEnvironment,
            NATIVE_NAMESPACE => Namespace::NativeCode,
            other => Namespace::Generic(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Namespace::Package => PACKAGE_NAMESPACE,
            Namespace::Bundle => BUNDLE_NAMESPACE,
            Namespace::Host => HOST_NAMESPACE,
            Namespace::Identity => IDENTITY_NAMESPACE,
            Namespace::ExecutionEnvironment => EXECUTION_ENVIRONMENT_NAMESPACE,
            Namespace::NativeCode => NATIVE_NAMESPACE,
            Namespace::Generic(name) => name,
        }
    }

    /// The attribute candidate ordering sorts on.
    pub fn version_attribute(&self) -> &'static str {
        match self {
            Namespace::Bundle | Namespace::Host => BUNDLE_VERSION_ATTRIBUTE,
            _ => VERSION_ATTRIBUTE,
        }
    }

    /// Whether a revision may satisfy its own requirement in this namespace.
    pub fn allows_self_wire(&self) -> bool {
        matches!(self, Namespace::Package | Namespace::Generic(_))
    }

    pub fn case_insensitive_strings(&self) -> bool {
        matches!(self, Namespace::NativeCode)
    }

    pub fn supports_dynamic(&self) -> bool {
        matches!(self, Namespace::Package)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching and merge rules shared by the index, the engine and dynamic resolution.
#[derive(Debug, Clone)]
pub struct NamespacePolicy {
    non_mergeable: Vec<String>,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::new(&ResolverConfig::default())
    }
}

impl NamespacePolicy {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            non_mergeable: config.non_mergeable_namespaces.clone(),
        }
    }

    /// Whether a fragment's entry in `namespace` merges into the host wiring.
    pub fn is_mergeable(&self, namespace: &str) -> bool {
        !matches!(namespace, IDENTITY_NAMESPACE | HOST_NAMESPACE)
            && !self.non_mergeable.iter().any(|n| n == namespace)
    }

    pub fn matches(
        &self,
        requirement: &Requirement,
        capability: &Capability,
    ) -> Result<bool, FilterError> {
        if requirement.namespace != capability.namespace {
            return Ok(false);
        }
        if !requirement.is_effective() || !capability.is_effective() {
            return Ok(false);
        }
        let namespace = Namespace::of(&capability.namespace);
        if requirement.owner == capability.owner && !namespace.allows_self_wire() {
            return Ok(false);
        }

        let filter = requirement.filter()?;
        if let Some(filter) = filter {
            if !filter.matches(&capability.attributes, namespace.case_insensitive_strings()) {
                return Ok(false);
            }
        }

        match namespace {
            Namespace::Package => {
                // Every mandatory attribute must be named by the importer.
                let referenced = filter.map(|f| f.attribute_names()).unwrap_or_default();
                Ok(capability.mandatory_attributes().iter().all(|attribute| {
                    referenced
                        .iter()
                        .any(|name| name.eq_ignore_ascii_case(attribute))
                }))
            }
            Namespace::Host => Ok(capability
                .directives
                .get(FRAGMENT_ATTACHMENT_DIRECTIVE)
                .map_or(true, |policy| policy != "never")),
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RevisionDescriptor, RevisionId};

    #[test]
    fn test_namespace_round_trip() {
        for name in [PACKAGE_NAMESPACE, HOST_NAMESPACE, "acme.service"] {
            assert_eq!(Namespace::of(name).as_str(), name);
        }
        assert_eq!(Namespace::of(HOST_NAMESPACE).version_attribute(), "bundle-version");
    }

    #[test]
    fn test_mandatory_attributes_must_be_referenced() {
        let policy = NamespacePolicy::default();
        let exporter = RevisionDescriptor::bundle("exporter", "1.0")
            .export_mandatory("p", "1.0", &[("flavor", "blue")])
            .build(RevisionId(1))
            .unwrap();
        let export = exporter.capabilities_in(PACKAGE_NAMESPACE).next().unwrap();

        let plain = RevisionDescriptor::bundle("plain", "1.0")
            .import("p", None)
            .build(RevisionId(2))
            .unwrap();
        assert!(!policy.matches(&plain.requirements[0], export).unwrap());

        let naming = crate::models::RequirementDescriptor::new(
            PACKAGE_NAMESPACE,
            Some("(&(osgi.wiring.package=p)(flavor=blue))".to_string()),
        );
        let naming = RevisionDescriptor::bundle("naming", "1.0")
            .requirement(naming)
            .build(RevisionId(3))
            .unwrap();
        assert!(policy.matches(&naming.requirements[0], export).unwrap());
    }

    #[test]
    fn test_host_attachment_never() {
        let policy = NamespacePolicy::default();
        let host = RevisionDescriptor::bundle("host", "1.0")
            .fragment_attachment("never")
            .build(RevisionId(1))
            .unwrap();
        let fragment = RevisionDescriptor::fragment("frag", "1.0", "host", None)
            .build(RevisionId(2))
            .unwrap();
        let host_capability = host.capabilities_in(HOST_NAMESPACE).next().unwrap();
        assert!(!policy
            .matches(fragment.host_requirement().unwrap(), host_capability)
            .unwrap());
    }

    #[test]
    fn test_bundle_requirement_never_wires_to_self() {
        let policy = NamespacePolicy::default();
        let revision = RevisionDescriptor::bundle("selfish", "1.0")
            .require_bundle("selfish", None, false)
            .export("p", "1.0")
            .import("p", None)
            .build(RevisionId(1))
            .unwrap();
        let bundle = revision.capabilities_in(BUNDLE_NAMESPACE).next().unwrap();
        let export = revision.capabilities_in(PACKAGE_NAMESPACE).next().unwrap();
        assert!(!policy.matches(&revision.requirements[0], bundle).unwrap());
        assert!(policy.matches(&revision.requirements[1], export).unwrap());
    }

    #[test]
    fn test_non_mergeable_namespaces() {
        let policy = NamespacePolicy::default();
        assert!(!policy.is_mergeable(EXECUTION_ENVIRONMENT_NAMESPACE));
        assert!(!policy.is_mergeable(HOST_NAMESPACE));
        assert!(policy.is_mergeable(PACKAGE_NAMESPACE));
    }

    #[test]
    fn test_malformed_filter_is_an_error() {
        let policy = NamespacePolicy::default();
        let broken = RevisionDescriptor::bundle("broken", "1.0")
            .requirement(crate::models::RequirementDescriptor::new(
                PACKAGE_NAMESPACE,
                Some("(osgi.wiring.package=p".to_string()),
            ))
            .build(RevisionId(1))
            .unwrap();
        let exporter = RevisionDescriptor::bundle("exporter", "1.0")
            .export("p", "1.0")
            .build(RevisionId(2))
            .unwrap();
        let export = exporter.capabilities_in(PACKAGE_NAMESPACE).next().unwrap();
        assert!(policy.matches(&broken.requirements[0], export).is_err());
    }
}
