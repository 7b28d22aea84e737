//! Container definition and runtime context types.
//!
//! The definition mirrors the subset of the OCI runtime `config.json` that
//! the transition engine consumes. Field names follow the OCI document so
//! a bundle's configuration deserialises directly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};

/// Parsed container definition, owned by the caller and read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    /// Root filesystem of the container.
    pub root: Root,
    /// Attributes of the contained process.
    #[serde(default)]
    pub process: Process,
    /// Mounts to build inside the container, in order.
    #[serde(default)]
    pub mounts: Vec<MountRequest>,
    /// Linux-specific isolation settings.
    #[serde(default)]
    pub linux: Linux,
}

impl ContainerDefinition {
    /// Parses a definition from an OCI `config.json` document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or lacks required fields.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Loads the definition stored in a bundle directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(bundle: &Path) -> Result<Self> {
        let path = bundle.join(crate::constants::CONFIG_FILE_NAME);
        let content = std::fs::read_to_string(&path).map_err(|e| StratumError::Io {
            path: path.clone(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    /// Namespace requests, in order.
    #[must_use]
    pub fn namespaces(&self) -> &[NamespaceRequest] {
        &self.linux.namespaces
    }

    /// Rlimit requests, in order.
    #[must_use]
    pub fn rlimits(&self) -> &[RlimitRequest] {
        &self.process.rlimits
    }
}

/// The `root` section: where the container's filesystem lives on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Host path of the container root filesystem.
    pub path: PathBuf,
}

/// The `process` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Named capability sets; absent means every set is empty.
    #[serde(default)]
    pub capabilities: Option<CapabilityNames>,
    /// Whether `PR_SET_NO_NEW_PRIVS` is applied.
    #[serde(default)]
    pub no_new_privileges: bool,
    /// Resource limits, in order.
    #[serde(default)]
    pub rlimits: Vec<RlimitRequest>,
}

/// Capability names requested for each of the five capability sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityNames {
    /// Effective set.
    #[serde(default)]
    pub effective: Vec<String>,
    /// Permitted set.
    #[serde(default)]
    pub permitted: Vec<String>,
    /// Inheritable set.
    #[serde(default)]
    pub inheritable: Vec<String>,
    /// Ambient set.
    #[serde(default)]
    pub ambient: Vec<String>,
    /// Bounding set.
    #[serde(default)]
    pub bounding: Vec<String>,
}

/// One resource limit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlimitRequest {
    /// Resource name, e.g. `RLIMIT_NOFILE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Soft limit.
    pub soft: u64,
    /// Hard limit.
    pub hard: u64,
}

/// One entry of the `mounts` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    /// Absolute path inside the container.
    pub destination: PathBuf,
    /// Mount source; the filesystem type is used when absent.
    #[serde(default)]
    pub source: Option<String>,
    /// Filesystem type, or `bind`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Mount options. `None` selects the destination defaults, while an
    /// empty list means "no options".
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

/// The `linux` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// Namespaces to create or join, in order.
    #[serde(default)]
    pub namespaces: Vec<NamespaceRequest>,
    /// Propagation mode for the root mount.
    #[serde(default)]
    pub rootfs_propagation: Option<String>,
}

/// One entry of the `linux.namespaces` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRequest {
    /// Namespace type name (`mount`, `pid`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Existing namespace to join instead of keeping the fresh one.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Identity of the launching user and the chosen root path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    /// Host user ID of the launcher.
    pub host_uid: u32,
    /// Host group ID of the launcher.
    pub host_gid: u32,
    /// Directory that becomes the container's `/`.
    pub rootfs_path: PathBuf,
    /// Propagation used when the definition names none.
    pub default_propagation: Option<String>,
}

impl RuntimeContext {
    /// Creates a context for the given host identity and rootfs directory.
    #[must_use]
    pub fn new(host_uid: u32, host_gid: u32, rootfs_path: impl Into<PathBuf>) -> Self {
        Self {
            host_uid,
            host_gid,
            rootfs_path: rootfs_path.into(),
            default_propagation: None,
        }
    }

    /// Sets the propagation used when the definition names none.
    #[must_use]
    pub fn with_default_propagation(mut self, name: impl Into<String>) -> Self {
        self.default_propagation = Some(name.into());
        self
    }

    /// Whether the launcher runs as host root.
    #[must_use]
    pub const fn host_privileged(&self) -> bool {
        self.host_uid == 0
    }
}
