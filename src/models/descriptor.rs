/// Descriptors for installable revisions, as handed over by the storage layer.
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::version::{Version, VersionError, VersionRange};
use super::{
    AttributeValue, Capability, Requirement, Revision, RevisionId, BUNDLE_NAMESPACE,
    BUNDLE_SYMBOLIC_NAME_ATTRIBUTE, BUNDLE_VERSION_ATTRIBUTE, CARDINALITY_DIRECTIVE,
    EXECUTION_ENVIRONMENT_NAMESPACE, FRAGMENT_ATTACHMENT_DIRECTIVE, HOST_NAMESPACE,
    IDENTITY_NAMESPACE, IDENTITY_TYPE_ATTRIBUTE, MANDATORY_DIRECTIVE, NATIVE_NAMESPACE,
    PACKAGE_NAMESPACE, RESOLUTION_DIRECTIVE, SINGLETON_DIRECTIVE, USES_DIRECTIVE,
    VERSION_ATTRIBUTE, VISIBILITY_DIRECTIVE,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor error: {0}")]
    Version(#[from] VersionError),
    #[error("Descriptor for {0} has no symbolic name")]
    MissingSymbolicName(String),
    #[error("Namespace {0} is derived from the descriptor and cannot be declared")]
    ReservedNamespace(String),
    #[error("Capability or requirement without namespace in {0}")]
    EmptyNamespace(String),
    #[error("Failed to read universe {0}: {1}")]
    Io(String, String),
    #[error("Failed to parse universe: {0}")]
    Yaml(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    pub namespace: String,
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub directives: IndexMap<String, String>,
}

impl CapabilityDescriptor {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            attributes: IndexMap::new(),
            directives: IndexMap::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn directive(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RequirementDescriptor {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub directives: IndexMap<String, String>,
}

impl RequirementDescriptor {
    pub fn new(namespace: impl Into<String>, filter: Option<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filter,
            directives: IndexMap::new(),
        }
    }

    pub fn directive(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FragmentHost {
    pub symbolic_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
}

/// Everything the container needs to know about one revision before it is installed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RevisionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub symbolic_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_host: Option<FragmentHost>,
    /// `always`, `never` or `resolve-time` on hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_attachment: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub requirements: Vec<RequirementDescriptor>,
    // First error raised by a builder method, surfaced by `build`.
    #[serde(skip)]
    pending_error: Option<DescriptorError>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl RevisionDescriptor {
    pub fn bundle(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            location: None,
            symbolic_name: symbolic_name.into(),
            version: version.into(),
            singleton: false,
            fragment_host: None,
            fragment_attachment: None,
            capabilities: Vec::new(),
            requirements: Vec::new(),
            pending_error: None,
        }
    }

    pub fn fragment(
        symbolic_name: impl Into<String>,
        version: impl Into<String>,
        host: impl Into<String>,
        host_range: Option<&str>,
    ) -> Self {
        let mut descriptor = Self::bundle(symbolic_name, version);
        descriptor.fragment_host = Some(FragmentHost {
            symbolic_name: host.into(),
            version_range: host_range.map(str::to_string),
        });
        descriptor
    }

    /// Install location; defaults to `revision://<name>/<version>`.
    pub fn location(&self) -> String {
        self.location
            .clone()
            .unwrap_or_else(|| format!("revision://{}/{}", self.symbolic_name, self.version))
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn fragment_attachment(mut self, policy: impl Into<String>) -> Self {
        self.fragment_attachment = Some(policy.into());
        self
    }

    pub fn capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn requirement(mut self, requirement: RequirementDescriptor) -> Self {
        self.requirements.push(requirement);
        self
    }

    fn record<T>(&mut self, result: Result<T, VersionError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e.into());
                }
                None
            }
        }
    }

    fn range_filter(&mut self, attribute: &str, range: Option<&str>) -> String {
        match range {
            Some(text) => self
                .record(VersionRange::parse(text))
                .map(|r| r.to_filter(attribute))
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    pub fn export(self, package: &str, version: &str) -> Self {
        self.export_uses(package, version, &[])
    }

    pub fn export_uses(mut self, package: &str, version: &str, uses: &[&str]) -> Self {
        let Some(version) = self.record(Version::parse(version)) else {
            return self;
        };
        let mut capability = CapabilityDescriptor::new(PACKAGE_NAMESPACE)
            .attribute(PACKAGE_NAMESPACE, package)
            .attribute(VERSION_ATTRIBUTE, version);
        if !uses.is_empty() {
            capability = capability.directive(USES_DIRECTIVE, uses.join(","));
        }
        self.capability(capability)
    }

    /// Export with extra matching attributes that importers must name.
    pub fn export_mandatory(
        mut self,
        package: &str,
        version: &str,
        attributes: &[(&str, &str)],
    ) -> Self {
        let Some(version) = self.record(Version::parse(version)) else {
            return self;
        };
        let mut capability = CapabilityDescriptor::new(PACKAGE_NAMESPACE)
            .attribute(PACKAGE_NAMESPACE, package)
            .attribute(VERSION_ATTRIBUTE, version);
        for (name, value) in attributes {
            capability = capability.attribute(*name, *value);
        }
        let names: Vec<&str> = attributes.iter().map(|(name, _)| *name).collect();
        capability = capability.directive(MANDATORY_DIRECTIVE, names.join(","));
        self.capability(capability)
    }

    fn package_requirement(&mut self, package: &str, range: Option<&str>) -> RequirementDescriptor {
        let range = self.range_filter(VERSION_ATTRIBUTE, range);
        let filter = if range.is_empty() {
            format!("({}={})", PACKAGE_NAMESPACE, package)
        } else {
            format!("(&({}={}){})", PACKAGE_NAMESPACE, package, range)
        };
        RequirementDescriptor::new(PACKAGE_NAMESPACE, Some(filter))
    }

    pub fn import(mut self, package: &str, range: Option<&str>) -> Self {
        let requirement = self.package_requirement(package, range);
        self.requirement(requirement)
    }

    pub fn import_optional(mut self, package: &str, range: Option<&str>) -> Self {
        let requirement = self
            .package_requirement(package, range)
            .directive(RESOLUTION_DIRECTIVE, "optional");
        self.requirement(requirement)
    }

    /// Dynamic import; `pattern` may end in `*`, e.g. `com.acme.*` or `*`.
    pub fn import_dynamic(self, pattern: &str) -> Self {
        let requirement = RequirementDescriptor::new(
            PACKAGE_NAMESPACE,
            Some(format!("({}={})", PACKAGE_NAMESPACE, pattern)),
        )
        .directive(RESOLUTION_DIRECTIVE, "dynamic");
        self.requirement(requirement)
    }

    pub fn require_bundle(mut self, symbolic_name: &str, range: Option<&str>, reexport: bool) -> Self {
        let range = self.range_filter(BUNDLE_VERSION_ATTRIBUTE, range);
        let filter = if range.is_empty() {
            format!("({}={})", BUNDLE_NAMESPACE, symbolic_name)
        } else {
            format!("(&({}={}){})", BUNDLE_NAMESPACE, symbolic_name, range)
        };
        let mut requirement = RequirementDescriptor::new(BUNDLE_NAMESPACE, Some(filter));
        if reexport {
            requirement = requirement.directive(VISIBILITY_DIRECTIVE, "reexport");
        }
        self.requirement(requirement)
    }

    /// Requires every capability matching `filter` in `namespace`.
    pub fn require_multiple(self, namespace: &str, filter: &str) -> Self {
        let requirement = RequirementDescriptor::new(namespace, Some(filter.to_string()))
            .directive(CARDINALITY_DIRECTIVE, "multiple");
        self.requirement(requirement)
    }

    pub fn require_ee(self, filter: &str) -> Self {
        self.requirement(RequirementDescriptor::new(
            EXECUTION_ENVIRONMENT_NAMESPACE,
            Some(filter.to_string()),
        ))
    }

    pub fn require_native(self, filter: &str) -> Self {
        self.requirement(RequirementDescriptor::new(
            NATIVE_NAMESPACE,
            Some(filter.to_string()),
        ))
    }

    pub fn provide_ee(mut self, name: &str, versions: &[&str]) -> Self {
        let parsed: Result<Vec<Version>, VersionError> =
            versions.iter().map(|v| Version::parse(v)).collect();
        let Some(parsed) = self.record(parsed) else {
            return self;
        };
        self.capability(
            CapabilityDescriptor::new(EXECUTION_ENVIRONMENT_NAMESPACE)
                .attribute(EXECUTION_ENVIRONMENT_NAMESPACE, name)
                .attribute(VERSION_ATTRIBUTE, AttributeValue::Versions(parsed)),
        )
    }

    /// Builds the immutable revision, deriving the implicit identity, bundle and host entries.
    pub fn build(&self, id: RevisionId) -> Result<Revision, DescriptorError> {
        if let Some(error) = &self.pending_error {
            return Err(error.clone());
        }
        if self.symbolic_name.trim().is_empty() {
            return Err(DescriptorError::MissingSymbolicName(self.location()));
        }
        let version = Version::parse(&self.version)?;
        let is_fragment = self.fragment_host.is_some();

        let mut capabilities = Vec::new();
        let mut push_capability = |namespace: &str,
                                   attributes: IndexMap<String, AttributeValue>,
                                   directives: IndexMap<String, String>| {
            let ordinal = capabilities.len();
            capabilities.push(Arc::new(Capability {
                namespace: namespace.to_string(),
                attributes,
                directives,
                owner: id,
                ordinal,
            }));
        };

        let mut identity_directives = IndexMap::new();
        if self.singleton {
            identity_directives.insert(SINGLETON_DIRECTIVE.to_string(), "true".to_string());
        }
        push_capability(
            IDENTITY_NAMESPACE,
            IndexMap::from([
                (
                    IDENTITY_NAMESPACE.to_string(),
                    AttributeValue::from(self.symbolic_name.clone()),
                ),
                (
                    IDENTITY_TYPE_ATTRIBUTE.to_string(),
                    AttributeValue::from(if is_fragment { "osgi.fragment" } else { "osgi.bundle" }),
                ),
                (
                    VERSION_ATTRIBUTE.to_string(),
                    AttributeValue::Version(version.clone()),
                ),
            ]),
            identity_directives.clone(),
        );

        if !is_fragment {
            for namespace in [BUNDLE_NAMESPACE, HOST_NAMESPACE] {
                let mut directives = identity_directives.clone();
                if namespace == HOST_NAMESPACE {
                    if let Some(policy) = &self.fragment_attachment {
                        directives.insert(FRAGMENT_ATTACHMENT_DIRECTIVE.to_string(), policy.clone());
                    }
                }
                push_capability(
                    namespace,
                    IndexMap::from([
                        (
                            namespace.to_string(),
                            AttributeValue::from(self.symbolic_name.clone()),
                        ),
                        (
                            BUNDLE_VERSION_ATTRIBUTE.to_string(),
                            AttributeValue::Version(version.clone()),
                        ),
                    ]),
                    directives,
                );
            }
        }

        for declared in &self.capabilities {
            check_namespace(&declared.namespace, &self.symbolic_name)?;
            let mut attributes = declared.attributes.clone();
            if declared.namespace == PACKAGE_NAMESPACE {
                attributes
                    .entry(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE.to_string())
                    .or_insert_with(|| AttributeValue::from(self.symbolic_name.clone()));
                attributes
                    .entry(BUNDLE_VERSION_ATTRIBUTE.to_string())
                    .or_insert_with(|| AttributeValue::Version(version.clone()));
                attributes
                    .entry(VERSION_ATTRIBUTE.to_string())
                    .or_insert_with(|| AttributeValue::Version(Version::EMPTY));
            }
            push_capability(&declared.namespace, attributes, declared.directives.clone());
        }

        let mut requirements = Vec::new();
        if let Some(host) = &self.fragment_host {
            let range = match &host.version_range {
                Some(text) => VersionRange::parse(text)?.to_filter(BUNDLE_VERSION_ATTRIBUTE),
                None => String::new(),
            };
            let filter = if range.is_empty() {
                format!("({}={})", HOST_NAMESPACE, host.symbolic_name)
            } else {
                format!("(&({}={}){})", HOST_NAMESPACE, host.symbolic_name, range)
            };
            requirements.push(Arc::new(Requirement::new(
                HOST_NAMESPACE,
                Some(filter),
                IndexMap::new(),
                id,
                0,
            )));
        }
        for declared in &self.requirements {
            check_namespace(&declared.namespace, &self.symbolic_name)?;
            let ordinal = requirements.len();
            requirements.push(Arc::new(Requirement::new(
                declared.namespace.clone(),
                declared.filter.clone(),
                declared.directives.clone(),
                id,
                ordinal,
            )));
        }

        Ok(Revision {
            id,
            location: self.location(),
            symbolic_name: self.symbolic_name.clone(),
            version,
            capabilities,
            requirements,
            is_fragment,
            is_singleton: self.singleton,
        })
    }
}

fn check_namespace(namespace: &str, owner: &str) -> Result<(), DescriptorError> {
    if namespace.trim().is_empty() {
        return Err(DescriptorError::EmptyNamespace(owner.to_string()));
    }
    if matches!(namespace, IDENTITY_NAMESPACE | HOST_NAMESPACE) {
        return Err(DescriptorError::ReservedNamespace(namespace.to_string()));
    }
    Ok(())
}

/// A whole set of revisions, in install order.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct UniverseDescriptor {
    pub revisions: Vec<RevisionDescriptor>,
}

impl UniverseDescriptor {
    pub fn from_yaml(content: &str) -> Result<Self, DescriptorError> {
        serde_yaml::from_str(content).map_err(|e| DescriptorError::Yaml(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DescriptorError::Io(path.display().to_string(), e.to_string()))?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_derives_implicit_capabilities() {
        let revision = RevisionDescriptor::bundle("org.acme.core", "1.2.0")
            .singleton()
            .export("org.acme.api", "1.2.0")
            .build(RevisionId(7))
            .unwrap();

        let namespaces: Vec<&str> = revision
            .capabilities
            .iter()
            .map(|c| c.namespace.as_str())
            .collect();
        assert_eq!(
            namespaces,
            vec![IDENTITY_NAMESPACE, BUNDLE_NAMESPACE, HOST_NAMESPACE, PACKAGE_NAMESPACE]
        );
        assert!(revision.is_singleton);
        assert_eq!(revision.location, "revision://org.acme.core/1.2.0");

        let export = &revision.capabilities[3];
        assert_eq!(export.name(), Some("org.acme.api"));
        assert_eq!(
            export.attributes.get(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE),
            Some(&AttributeValue::from("org.acme.core"))
        );
        assert!(revision.capabilities.iter().all(|c| c.owner == RevisionId(7)));
    }

    #[test]
    fn test_fragment_gets_host_requirement() {
        let revision = RevisionDescriptor::fragment("frag", "1.0", "host", Some("[1.0,2.0)"))
            .require_ee("(osgi.ee=JavaSE)")
            .build(RevisionId(1))
            .unwrap();
        assert!(revision.is_fragment);
        let host = revision.host_requirement().unwrap();
        assert_eq!(
            host.filter_text.as_deref(),
            Some("(&(osgi.wiring.host=host)(&(bundle-version>=1.0.0)(!(bundle-version>=2.0.0))))")
        );
        assert_eq!(revision.requirements[1].ordinal, 1);
        assert_eq!(revision.capabilities_in(BUNDLE_NAMESPACE).count(), 0);
    }

    #[test]
    fn test_builder_errors_surface_on_build() {
        let result = RevisionDescriptor::bundle("broken", "1.0")
            .import("p", Some("[2.0,1.0]"))
            .build(RevisionId(1));
        assert!(matches!(result, Err(DescriptorError::Version(_))));
    }

    #[test]
    fn test_reserved_namespace_rejected() {
        let result = RevisionDescriptor::bundle("a", "1.0")
            .capability(CapabilityDescriptor::new(IDENTITY_NAMESPACE))
            .build(RevisionId(1));
        assert!(matches!(result, Err(DescriptorError::ReservedNamespace(_))));
    }

    #[test]
    fn test_universe_from_yaml() {
        let universe = UniverseDescriptor::from_yaml(
            r#"
revisions:
  - symbolic_name: a
    version: "1.0.0"
    capabilities:
      - namespace: osgi.wiring.package
        attributes:
          osgi.wiring.package: pkg1
          version: "version:1.0"
  - symbolic_name: b
    requirements:
      - namespace: osgi.wiring.package
        filter: "(osgi.wiring.package=pkg1)"
"#,
        )
        .unwrap();
        assert_eq!(universe.revisions.len(), 2);
        let b = universe.revisions[1].build(RevisionId(2)).unwrap();
        assert_eq!(b.version, Version::EMPTY);
        assert_eq!(b.requirements_in(PACKAGE_NAMESPACE).count(), 1);
    }
}
