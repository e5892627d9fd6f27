use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Plugin configuration set through `SetConfig`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DriverConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

impl DriverConfig {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

fn default_enabled() -> bool {
    true
}

/// One attribute of a configuration schema.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct SchemaAttr {
    pub name: &'static str,
    /// HCL type name (`bool`, `string`, ...).
    pub ty: &'static str,
    pub required: bool,
    /// Literal default, if any.
    pub default: Option<&'static str>,
}

/// Static plugin metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct PluginInfo {
    pub plugin_type: &'static str,
    pub plugin_api_versions: Vec<&'static str>,
    pub plugin_version: &'static str,
    pub name: &'static str,
}

/// Filesystem isolation offered to tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum FsIsolation {
    None,
    Chroot,
    Image,
}

/// Driver capabilities advertised to the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Capabilities {
    pub send_signals: bool,
    pub exec: bool,
    pub fs_isolation: FsIsolation,
}

/// Health reported in a fingerprint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HealthState {
    Undetected,
    Unhealthy,
    Healthy,
}

/// Periodic health/capability report.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Fingerprint {
    pub attributes: BTreeMap<String, String>,
    pub health: HealthState,
    pub health_description: String,
}
