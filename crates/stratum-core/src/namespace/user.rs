//! User namespace identity mapping.
//!
//! Maps container UID/GID 0 to the launching host user. A privileged host
//! user maps the full range `0 0 65536`; an unprivileged one maps only its
//! own identity.

use std::path::Path;

use stratum_common::constants::{FULL_ID_RANGE, GID_MAP_PATH, SETGROUPS_PATH, UID_MAP_PATH};
use stratum_common::error::{Result, StratumError};
use stratum_common::types::RuntimeContext;

/// Contents written to `uid_map` and `gid_map`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMaps {
    /// Single-line `uid_map` content.
    pub uid_map: String,
    /// Single-line `gid_map` content.
    pub gid_map: String,
}

impl IdMaps {
    /// Builds the maps for the launching host identity.
    #[must_use]
    pub fn for_context(ctx: &RuntimeContext) -> Self {
        if ctx.host_privileged() {
            let full = format!("0 0 {FULL_ID_RANGE}");
            Self {
                uid_map: full.clone(),
                gid_map: full,
            }
        } else {
            Self {
                uid_map: format!("0 {} 1", ctx.host_uid),
                gid_map: format!("0 {} 1", ctx.host_gid),
            }
        }
    }
}

/// Writes the identity maps of the calling process.
///
/// `setgroups` is denied first, otherwise the kernel rejects an unprivileged
/// `gid_map` write. The gid map is written before the uid map.
///
/// # Errors
///
/// Returns an error naming the file whose write failed.
#[cfg(target_os = "linux")]
pub fn write_id_maps(ctx: &RuntimeContext) -> Result<()> {
    let maps = IdMaps::for_context(ctx);
    write_proc_file(Path::new(SETGROUPS_PATH), "deny")?;
    write_proc_file(Path::new(GID_MAP_PATH), &maps.gid_map)?;
    write_proc_file(Path::new(UID_MAP_PATH), &maps.uid_map)?;
    tracing::info!(uid_map = %maps.uid_map, gid_map = %maps.gid_map, "wrote user namespace maps");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns a configuration error.
#[cfg(not(target_os = "linux"))]
pub fn write_id_maps(_ctx: &RuntimeContext) -> Result<()> {
    Err(StratumError::Config {
        message: "Linux required for user namespace mapping".into(),
    })
}

/// Procfs control files must receive their content in a single `write(2)`.
fn write_proc_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .map_err(|e| StratumError::syscall("write", path.display().to_string(), e))?;
    tracing::debug!(path = %path.display(), content, "wrote procfs control file");
    Ok(())
}
