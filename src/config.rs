use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{
    CapabilityDescriptor, DescriptorError, RevisionDescriptor, NATIVE_NAMESPACE,
};

/// Execution environment offered by the system revision.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecutionEnvironment {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct NativeEnvironment {
    #[serde(default)]
    pub osname: Vec<String>,
    #[serde(default)]
    pub processor: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SystemPackage {
    pub name: String,
    #[serde(default = "default_package_version")]
    pub version: String,
}

fn default_package_version() -> String {
    "0.0.0".to_string()
}

/// The revision that represents the container itself.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SystemConfig {
    pub symbolic_name: String,
    pub version: String,
    pub packages: Vec<SystemPackage>,
    pub execution_environments: Vec<ExecutionEnvironment>,
    pub native: NativeEnvironment,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            symbolic_name: "system.bundle".to_string(),
            version: "1.0.0".to_string(),
            packages: Vec::new(),
            execution_environments: vec![ExecutionEnvironment {
                name: "JavaSE".to_string(),
                versions: ["1.8", "11", "17"].iter().map(|v| v.to_string()).collect(),
            }],
            native: NativeEnvironment {
                osname: vec![std::env::consts::OS.to_string()],
                processor: vec![std::env::consts::ARCH.to_string()],
            },
        }
    }
}

impl SystemConfig {
    pub fn descriptor(&self) -> RevisionDescriptor {
        let mut descriptor = RevisionDescriptor::bundle(&*self.symbolic_name, &*self.version)
            .at("System Bundle");
        for package in &self.packages {
            descriptor = descriptor.export(&package.name, &package.version);
        }
        for ee in &self.execution_environments {
            let versions: Vec<&str> = ee.versions.iter().map(String::as_str).collect();
            descriptor = descriptor.provide_ee(&ee.name, &versions);
        }
        if !self.native.osname.is_empty() || !self.native.processor.is_empty() {
            descriptor = descriptor.capability(
                CapabilityDescriptor::new(NATIVE_NAMESPACE)
                    .attribute("osgi.native.osname", self.native.osname.clone())
                    .attribute("osgi.native.processor", self.native.processor.clone()),
            );
        }
        descriptor
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Namespaces a fragment keeps for itself instead of merging into its host.
    pub non_mergeable_namespaces: Vec<String>,
    /// Upper bound on uses-conflict retries within one resolve call.
    pub max_uses_backtracks: usize,
    pub dynamic_miss_cache: bool,
    pub offer_removal_pending: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            non_mergeable_namespaces: vec!["osgi.ee".to_string()],
            max_uses_backtracks: 1024,
            dynamic_miss_cache: true,
            offer_removal_pending: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ContainerConfig {
    pub system: SystemConfig,
    pub resolver: ResolverConfig,
}

impl ContainerConfig {
    pub fn from_yaml(content: &str) -> Result<Self, DescriptorError> {
        serde_yaml::from_str(content).map_err(|e| DescriptorError::Yaml(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DescriptorError::Io(path.display().to_string(), e.to_string()))?;
        Self::from_yaml(&content)
    }
}
