//! Ordered container transition pipeline.
//!
//! [`Transition`] carries the container definition through each stage. Each
//! stage consumes the previous state and returns the next one, so stages
//! cannot be skipped, repeated, or run out of order:
//!
//! ```text
//! Pending -> Isolated -> Mapped -> Rooted -> Restricted
//! ```
//!
//! The unshare flags produced by the namespace stage travel with the state
//! so later stages know which namespaces exist. Identity maps are written
//! while the host `/proc` is still reachable, before the pivot.

use nix::sched::CloneFlags;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::{ContainerDefinition, RuntimeContext};

use crate::filesystem::rootfs::transition_root;
use crate::namespace::{set_namespaces, user::write_id_maps};
use crate::{capability, rlimit};

/// Nothing has been applied yet.
#[derive(Debug)]
pub struct Pending;

/// Namespaces exist.
#[derive(Debug)]
pub struct Isolated {
    flags: CloneFlags,
}

/// The user namespace identity maps are written.
#[derive(Debug)]
pub struct Mapped {
    flags: CloneFlags,
}

/// The process root is the container rootfs.
#[derive(Debug)]
pub struct Rooted {
    flags: CloneFlags,
}

/// Capabilities and rlimits are applied; the process may exec.
#[derive(Debug)]
pub struct Restricted {
    flags: CloneFlags,
}

/// State that knows the flags passed to `unshare(2)`.
pub trait Unshared {
    /// Namespaces created by the isolation stage.
    fn unshare_flags(&self) -> CloneFlags;
}

macro_rules! impl_unshared {
    ($($state:ty),*) => {
        $(impl Unshared for $state {
            fn unshare_flags(&self) -> CloneFlags {
                self.flags
            }
        })*
    };
}

impl_unshared!(Isolated, Mapped, Rooted, Restricted);

/// A container transition at stage `S`.
#[derive(Debug)]
pub struct Transition<'a, S> {
    definition: &'a ContainerDefinition,
    context: &'a RuntimeContext,
    state: S,
}

impl<S: Unshared> Transition<'_, S> {
    /// Namespaces created by the isolation stage.
    #[must_use]
    pub fn unshare_flags(&self) -> CloneFlags {
        self.state.unshare_flags()
    }
}

impl<'a> Transition<'a, Pending> {
    /// Starts a transition for `definition` in `context`.
    #[must_use]
    pub const fn new(definition: &'a ContainerDefinition, context: &'a RuntimeContext) -> Self {
        Self {
            definition,
            context,
            state: Pending,
        }
    }

    /// Creates and joins the requested namespaces.
    ///
    /// # Errors
    ///
    /// Returns an error if a namespace type is unknown or a syscall fails.
    pub fn isolate_namespaces(self) -> Result<Transition<'a, Isolated>> {
        let flags = set_namespaces(self.definition.namespaces())?;
        Ok(Transition {
            definition: self.definition,
            context: self.context,
            state: Isolated { flags },
        })
    }
}

impl<'a> Transition<'a, Isolated> {
    /// Writes the uid/gid maps when a user namespace was created.
    ///
    /// # Errors
    ///
    /// Returns an error naming the procfs file whose write failed.
    pub fn map_identity(self) -> Result<Transition<'a, Mapped>> {
        let flags = self.state.flags;
        if flags.contains(CloneFlags::CLONE_NEWUSER) {
            write_id_maps(self.context)?;
        } else {
            tracing::debug!("no user namespace, skipping identity maps");
        }
        Ok(Transition {
            definition: self.definition,
            context: self.context,
            state: Mapped { flags },
        })
    }
}

impl<'a> Transition<'a, Mapped> {
    /// Builds the mount tree and pivots into the container rootfs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no mount namespace was created,
    /// since the pivot would otherwise rearrange the host's mounts.
    pub fn transition_root(self) -> Result<Transition<'a, Rooted>> {
        let flags = self.state.flags;
        if !flags.contains(CloneFlags::CLONE_NEWNS) {
            return Err(StratumError::Config {
                message: "root transition requires a mount namespace".into(),
            });
        }
        transition_root(self.definition, self.context)?;
        Ok(Transition {
            definition: self.definition,
            context: self.context,
            state: Rooted { flags },
        })
    }
}

impl<'a> Transition<'a, Rooted> {
    /// Applies capabilities, then resource limits.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown capability or rlimit names and for
    /// fatal kernel failures.
    pub fn restrict(self) -> Result<Transition<'a, Restricted>> {
        let process = &self.definition.process;
        capability::set_capabilities(process.capabilities.as_ref(), process.no_new_privileges)?;
        rlimit::set_rlimits(&process.rlimits)?;
        Ok(Transition {
            definition: self.definition,
            context: self.context,
            state: Restricted {
                flags: self.state.flags,
            },
        })
    }
}

/// Runs every stage in order.
///
/// On error the process is in an indeterminate state and must not exec
/// user code.
///
/// # Errors
///
/// Returns the first error raised by any stage.
pub fn run_all(definition: &ContainerDefinition, context: &RuntimeContext) -> Result<CloneFlags> {
    tracing::info!(rootfs = %context.rootfs_path.display(), "starting container transition");
    let done = Transition::new(definition, context)
        .isolate_namespaces()?
        .map_identity()?
        .transition_root()?
        .restrict()?;
    tracing::info!(flags = ?done.unshare_flags(), "container transition complete");
    Ok(done.unshare_flags())
}
