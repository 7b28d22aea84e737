//! Filesystem management for container isolation.
//!
//! Provides the mount plan executor, the root transition that bind-mounts
//! the container root and runs the plan, and the `pivot_root` sequence that
//! detaches the host's root.

pub mod mount;
pub mod pivot_root;
pub mod rootfs;
