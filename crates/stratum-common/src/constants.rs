//! System-wide constants and default paths.

/// Control file that must read `deny` before an unprivileged gid map write.
pub const SETGROUPS_PATH: &str = "/proc/self/setgroups";

/// User-ID mapping file of the calling process.
pub const UID_MAP_PATH: &str = "/proc/self/uid_map";

/// Group-ID mapping file of the calling process.
pub const GID_MAP_PATH: &str = "/proc/self/gid_map";

/// Highest capability number known to the running kernel.
pub const CAP_LAST_CAP_PATH: &str = "/proc/sys/kernel/cap_last_cap";

/// Number of IDs mapped into the container for a privileged host user.
pub const FULL_ID_RANGE: u32 = 65_536;

/// Group owning `/dev/pts` devices when the host user is privileged.
pub const TTY_GID: u32 = 5;

/// Propagation mode applied to the root when none is configured.
pub const DEFAULT_ROOTFS_PROPAGATION: &str = "rslave";

/// Default directory onto which the container root is bind-mounted.
pub const DEFAULT_ROOTFS_DIR: &str = "/run/stratum/rootfs";

/// Name of the OCI configuration document inside a bundle.
pub const CONFIG_FILE_NAME: &str = "config.json";
