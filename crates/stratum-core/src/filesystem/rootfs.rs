//! Root transition: isolate propagation, build the rootfs, and pivot into it.

use nix::mount::{MsFlags, mount};
use stratum_common::constants::DEFAULT_ROOTFS_PROPAGATION;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::{ContainerDefinition, RuntimeContext};

use super::mount::{Propagation, do_mounts};
use super::pivot_root::pivot_root;

/// Resolves the configured rootfs propagation, defaulting to `rslave`.
///
/// # Errors
///
/// Returns [`StratumError::InvalidPropagation`] for names that are not
/// propagation modes.
pub fn rootfs_propagation(name: Option<&str>) -> Result<Propagation> {
    Propagation::from_name(name.unwrap_or(DEFAULT_ROOTFS_PROPAGATION))
}

/// Resolves the propagation for `definition`, falling back to the
/// launcher default in `ctx` and then to `rslave`.
///
/// # Errors
///
/// Returns [`StratumError::InvalidPropagation`] for names that are not
/// propagation modes.
pub fn effective_propagation(
    definition: &ContainerDefinition,
    ctx: &RuntimeContext,
) -> Result<Propagation> {
    let configured = definition.linux.rootfs_propagation.as_deref();
    rootfs_propagation(configured.or(ctx.default_propagation.as_deref()))
}

/// Replaces the process root with the container's prepared rootfs.
///
/// The host root is first remounted with the configured propagation so
/// that nothing done here leaks back to the host. The container root is
/// then bind-mounted onto `ctx.rootfs_path`, the mount plan is executed
/// beneath it, and the process pivots into it.
///
/// # Errors
///
/// Returns an error naming the failing operation; the mount namespace is
/// left in an indeterminate state.
pub fn transition_root(definition: &ContainerDefinition, ctx: &RuntimeContext) -> Result<()> {
    let propagation = effective_propagation(definition, ctx)?;
    let flags = propagation.flags();
    let rootfs = ctx.rootfs_path.as_path();
    tracing::info!(
        root = %definition.root.path.display(),
        rootfs = %rootfs.display(),
        %propagation,
        "transitioning root"
    );

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | flags,
        None::<&str>,
    )
    .map_err(|e| StratumError::syscall("remount root", "/", e))?;

    mount(
        Some(definition.root.path.as_path()),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC | flags,
        None::<&str>,
    )
    .map_err(|e| StratumError::syscall("mount rootfs", rootfs.display().to_string(), e))?;

    do_mounts(&definition.mounts, Some(rootfs), ctx.host_privileged())?;
    pivot_root(rootfs)
}
