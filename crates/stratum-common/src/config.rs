//! Runtime configuration for the Stratum launcher.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};
use crate::types::RuntimeContext;

/// Launcher-level settings that are not part of the container definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory onto which the container root is bind-mounted before the pivot.
    pub rootfs_dir: PathBuf,
    /// Rootfs propagation applied when a definition sets no `rootfsPropagation`.
    pub default_propagation: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rootfs_dir: PathBuf::from(crate::constants::DEFAULT_ROOTFS_DIR),
            default_propagation: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration from a JSON file; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StratumError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Binds this configuration to the identity of the launching user.
    #[must_use]
    pub fn context(&self, host_uid: u32, host_gid: u32) -> RuntimeContext {
        RuntimeContext {
            default_propagation: self.default_propagation.clone(),
            ..RuntimeContext::new(host_uid, host_gid, self.rootfs_dir.clone())
        }
    }
}
