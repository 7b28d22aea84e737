//! Linux namespace management for container isolation.
//!
//! Provides safe wrappers around `unshare(2)` and `setns(2)`. Every request
//! type is resolved up front, a single `unshare(2)` creates the union of the
//! requested namespaces, and requests carrying a path then join that
//! existing namespace instead.

pub mod user;

use std::fmt;
use std::path::Path;

use nix::sched::CloneFlags;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::NamespaceRequest;

/// Namespace kinds accepted in a container definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceType {
    /// Mount table.
    Mount,
    /// Cgroup root directory.
    Cgroup,
    /// Network stack.
    Network,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Process IDs.
    Pid,
    /// Hostname and domain name.
    Uts,
    /// User and group IDs.
    User,
}

impl NamespaceType {
    /// Every namespace type, in table order.
    pub const ALL: [Self; 7] = [
        Self::Mount,
        Self::Cgroup,
        Self::Network,
        Self::Ipc,
        Self::Pid,
        Self::Uts,
        Self::User,
    ];

    /// Resolves a definition type name.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::InvalidNamespace`] for names outside the table.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.name() == name)
            .ok_or_else(|| StratumError::InvalidNamespace {
                name: name.to_string(),
            })
    }

    /// Name used in container definitions.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Cgroup => "cgroup",
            Self::Network => "network",
            Self::Ipc => "ipc",
            Self::Pid => "pid",
            Self::Uts => "uts",
            Self::User => "user",
        }
    }

    /// Kernel clone flag creating this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::User => CloneFlags::CLONE_NEWUSER,
        }
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Computes the union of clone flags for every request.
///
/// Requests carrying a join path contribute their flag as well.
///
/// # Errors
///
/// Returns [`StratumError::InvalidNamespace`] for the first unknown type.
pub fn unshare_flags(requests: &[NamespaceRequest]) -> Result<CloneFlags> {
    requests.iter().try_fold(CloneFlags::empty(), |flags, req| {
        Ok(flags | NamespaceType::from_name(&req.kind)?.clone_flag())
    })
}

/// Creates the requested namespaces and joins those given by path.
///
/// Returns the flags passed to `unshare(2)` so later stages can tell which
/// namespaces now exist.
///
/// # Errors
///
/// Returns an error if a type is unknown, if `unshare(2)` fails, or if a
/// join path cannot be opened or joined.
#[cfg(target_os = "linux")]
pub fn set_namespaces(requests: &[NamespaceRequest]) -> Result<CloneFlags> {
    use nix::sched::unshare;

    let flags = unshare_flags(requests)?;
    tracing::info!(?flags, count = requests.len(), "creating namespaces");

    unshare(flags).map_err(|e| StratumError::syscall("unshare", format!("{flags:?}"), e))?;

    for req in requests {
        if let Some(path) = &req.path {
            join_namespace(path, NamespaceType::from_name(&req.kind)?)?;
        }
    }
    Ok(flags)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Returns the type lookup error, otherwise always a configuration error.
#[cfg(not(target_os = "linux"))]
pub fn set_namespaces(requests: &[NamespaceRequest]) -> Result<CloneFlags> {
    let _ = unshare_flags(requests)?;
    Err(StratumError::Config {
        message: "Linux required for namespace isolation".into(),
    })
}

/// Joins the namespace referenced by `path`.
///
/// The descriptor is released when this function returns, on every path.
///
/// # Errors
///
/// Returns an error naming the path if it cannot be opened or if `setns(2)` fails.
#[cfg(target_os = "linux")]
pub fn join_namespace(path: &Path, ns: NamespaceType) -> Result<()> {
    use std::fs::File;
    use std::os::fd::AsFd;

    use nix::sched::setns;

    let file = File::open(path)
        .map_err(|e| StratumError::syscall("open", path.display().to_string(), e))?;
    setns(file.as_fd(), ns.clone_flag())
        .map_err(|e| StratumError::syscall("setns", path.display().to_string(), e))?;
    tracing::debug!(path = %path.display(), namespace = %ns, "joined namespace");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns a configuration error.
#[cfg(not(target_os = "linux"))]
pub fn join_namespace(_path: &Path, _ns: NamespaceType) -> Result<()> {
    Err(StratumError::Config {
        message: "Linux required for namespace isolation".into(),
    })
}
