//! Mount plan execution for container filesystem setup.
//!
//! Translates each mount request into kernel mount flags plus a
//! filesystem-specific data string, creates the mount point, and issues
//! `mount(2)`. Requests without options fall back to per-destination
//! defaults for the well-known pseudo filesystems.

use std::fmt;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};
use nix::sys::statvfs::{FsFlags, statvfs};
use stratum_common::constants::TTY_GID;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::MountRequest;

/// Mount propagation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// `MS_REC | MS_SHARED`.
    RShared,
    /// `MS_REC | MS_SLAVE`.
    RSlave,
    /// `MS_REC | MS_PRIVATE`.
    RPrivate,
    /// `MS_SHARED`.
    Shared,
    /// `MS_SLAVE`.
    Slave,
    /// `MS_PRIVATE`.
    Private,
    /// `MS_UNBINDABLE`.
    Unbindable,
}

impl Propagation {
    /// Every propagation mode, in table order.
    pub const ALL: [Self; 7] = [
        Self::RShared,
        Self::RSlave,
        Self::RPrivate,
        Self::Shared,
        Self::Slave,
        Self::Private,
        Self::Unbindable,
    ];

    /// Looks up a propagation mode by option name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Resolves a propagation mode by name.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::InvalidPropagation`] for names outside the table.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::lookup(name).ok_or_else(|| StratumError::InvalidPropagation {
            name: name.to_string(),
        })
    }

    /// Option name of this mode.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RShared => "rshared",
            Self::RSlave => "rslave",
            Self::RPrivate => "rprivate",
            Self::Shared => "shared",
            Self::Slave => "slave",
            Self::Private => "private",
            Self::Unbindable => "unbindable",
        }
    }

    /// Kernel flags selecting this mode.
    #[must_use]
    pub const fn flags(self) -> MsFlags {
        match self {
            Self::RShared => MsFlags::MS_REC.union(MsFlags::MS_SHARED),
            Self::RSlave => MsFlags::MS_REC.union(MsFlags::MS_SLAVE),
            Self::RPrivate => MsFlags::MS_REC.union(MsFlags::MS_PRIVATE),
            Self::Shared => MsFlags::MS_SHARED,
            Self::Slave => MsFlags::MS_SLAVE,
            Self::Private => MsFlags::MS_PRIVATE,
            Self::Unbindable => MsFlags::MS_UNBINDABLE,
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flags for a known option name: a propagation mode or a per-mount attribute.
#[must_use]
pub fn option_flags(name: &str) -> Option<MsFlags> {
    if let Some(propagation) = Propagation::lookup(name) {
        return Some(propagation.flags());
    }
    let flags = match name {
        "nosuid" => MsFlags::MS_NOSUID,
        "noexec" => MsFlags::MS_NOEXEC,
        "nodev" => MsFlags::MS_NODEV,
        "dirsync" => MsFlags::MS_DIRSYNC,
        "lazytime" => MsFlags::MS_LAZYTIME,
        "nodiratime" => MsFlags::MS_NODIRATIME,
        "noatime" => MsFlags::MS_NOATIME,
        "ro" => MsFlags::MS_RDONLY,
        "relatime" => MsFlags::MS_RELATIME,
        "strictatime" => MsFlags::MS_STRICTATIME,
        "synchronous" => MsFlags::MS_SYNCHRONOUS,
        _ => return None,
    };
    Some(flags)
}

/// Kernel mount flags plus the unrecognised options passed as mount data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountFlags {
    /// Flags passed to `mount(2)`.
    pub flags: MsFlags,
    /// Comma-joined filesystem-specific options.
    pub data: Option<String>,
    read_only: bool,
}

impl MountFlags {
    fn new(flags: MsFlags, data: Option<&str>) -> Self {
        Self {
            flags,
            data: data.map(str::to_string),
            read_only: false,
        }
    }

    /// Default flags for a request without options, keyed by destination.
    #[must_use]
    pub fn for_destination(destination: &Path, host_privileged: bool) -> Self {
        let Some(destination) = destination.to_str() else {
            return Self::new(MsFlags::empty(), None);
        };
        match destination {
            "/dev/cgroup" | "/sys/fs/cgroup" => Self::new(
                MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
                Some("none,name="),
            ),
            "/dev" => Self::new(
                MsFlags::MS_NOEXEC | MsFlags::MS_STRICTATIME,
                Some("mode=755"),
            ),
            "/dev/shm" => Self::new(
                MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                Some("mode=1777,size=65536k"),
            ),
            "/dev/mqueue" | "/sys" => Self::new(
                MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                None,
            ),
            "/dev/pts" => {
                let mut data = String::from("newinstance,ptmxmode=0666,mode=620");
                if host_privileged {
                    data.push_str(&format!(",gid={TTY_GID}"));
                }
                Self::new(MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID, Some(data.as_str()))
            }
            _ => Self::new(MsFlags::empty(), None),
        }
    }

    /// Folds option tokens into flags; unknown tokens become mount data in
    /// input order.
    #[must_use]
    pub fn from_options<S: AsRef<str>>(options: &[S]) -> Self {
        let mut result = Self::new(MsFlags::empty(), None);
        for option in options {
            let option = option.as_ref();
            match option_flags(option) {
                Some(flags) => result.flags |= flags,
                None => match &mut result.data {
                    Some(data) => {
                        data.push(',');
                        data.push_str(option);
                    }
                    None => result.data = Some(option.to_string()),
                },
            }
        }
        result
    }

    /// Computes the flags actually passed to `mount(2)` for a request.
    ///
    /// Bind mounts get `MS_BIND`; `MS_RDONLY` is always cleared and
    /// remembered for the read-only remount pass.
    #[must_use]
    pub fn for_request(request: &MountRequest, host_privileged: bool) -> Self {
        let mut result = match &request.options {
            None => Self::for_destination(&request.destination, host_privileged),
            Some(options) => Self::from_options(options),
        };
        if request.kind == "bind" {
            result.flags |= MsFlags::MS_BIND;
        }
        result.read_only = result.flags.contains(MsFlags::MS_RDONLY);
        result.flags.remove(MsFlags::MS_RDONLY);
        result
    }

    /// Whether `ro` was requested before the flag was cleared.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// A mount request resolved against the rootfs, ready to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMount {
    /// Destination inside the container.
    pub destination: PathBuf,
    /// Absolute host path of the mount point.
    pub target: PathBuf,
    /// Source passed to `mount(2)`.
    pub source: String,
    /// Filesystem type.
    pub kind: String,
    /// Flags and data.
    pub flags: MountFlags,
}

impl PlannedMount {
    /// Resolves a request against an optional new root.
    #[must_use]
    pub fn resolve(request: &MountRequest, rootfs: Option<&Path>, host_privileged: bool) -> Self {
        Self {
            destination: request.destination.clone(),
            target: mount_target(rootfs, &request.destination),
            source: request
                .source
                .clone()
                .unwrap_or_else(|| request.kind.clone()),
            kind: request.kind.clone(),
            flags: MountFlags::for_request(request, host_privileged),
        }
    }

    /// Cgroup mounts are not performed by this engine.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.kind == "cgroup"
    }
}

/// Host path of a container destination: under `rootfs` when a new root is
/// in effect, verbatim otherwise.
#[must_use]
pub fn mount_target(rootfs: Option<&Path>, destination: &Path) -> PathBuf {
    match rootfs {
        Some(root) => root.join(destination.strip_prefix("/").unwrap_or(destination)),
        None => destination.to_path_buf(),
    }
}

/// Creates `path` and every missing parent with mode 0755.
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub fn ensure_directory(path: &Path) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|e| StratumError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Executes the mount plan, in order.
///
/// Mounts that requested `ro` are remounted read-only once every mount has
/// been issued.
///
/// # Errors
///
/// Returns an error naming the destination of the first failing mount.
pub fn do_mounts(
    requests: &[MountRequest],
    rootfs: Option<&Path>,
    host_privileged: bool,
) -> Result<()> {
    let mut read_only = Vec::new();
    for request in requests {
        let planned = PlannedMount::resolve(request, rootfs, host_privileged);
        ensure_directory(&planned.target)?;

        if planned.is_skipped() {
            tracing::debug!(destination = %planned.destination.display(), "skipping cgroup mount");
            continue;
        }

        mount(
            Some(planned.source.as_str()),
            &planned.target,
            Some(planned.kind.as_str()),
            planned.flags.flags,
            planned.flags.data.as_deref(),
        )
        .map_err(|e| {
            StratumError::syscall("mount", planned.destination.display().to_string(), e)
        })?;
        tracing::debug!(
            destination = %planned.destination.display(),
            kind = %planned.kind,
            flags = ?planned.flags.flags,
            data = ?planned.flags.data,
            "mounted"
        );

        if planned.flags.is_read_only() {
            read_only.push(planned);
        }
    }
    remount_read_only(&read_only)
}

fn remount_read_only(mounts: &[PlannedMount]) -> Result<()> {
    for planned in mounts {
        let flags = planned.flags.flags
            | locked_flags(&planned.target)?
            | MsFlags::MS_REMOUNT
            | MsFlags::MS_BIND
            | MsFlags::MS_RDONLY;
        mount(None::<&str>, &planned.target, None::<&str>, flags, None::<&str>).map_err(|e| {
            StratumError::syscall("remount read-only", planned.destination.display().to_string(), e)
        })?;
        tracing::debug!(destination = %planned.destination.display(), "remounted read-only");
    }
    Ok(())
}

/// Flags a bind remount must repeat: inside a user namespace the kernel
/// refuses to clear per-mount flags inherited from a more privileged one.
fn locked_flags(target: &Path) -> Result<MsFlags> {
    let stat = statvfs(target)
        .map_err(|e| StratumError::syscall("statvfs", target.display().to_string(), e))?;
    Ok(remount_flags(stat.flags()))
}

fn remount_flags(current: FsFlags) -> MsFlags {
    let mut flags = MsFlags::empty();
    for (fs, ms) in [
        (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
        (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
        (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
        (FsFlags::ST_NOATIME, MsFlags::MS_NOATIME),
        (FsFlags::ST_NODIRATIME, MsFlags::MS_NODIRATIME),
    ] {
        if current.contains(fs) {
            flags |= ms;
        }
    }
    if !current.intersects(FsFlags::ST_NOATIME | FsFlags::ST_RELATIME) {
        flags |= MsFlags::MS_STRICTATIME;
    }
    flags
}
