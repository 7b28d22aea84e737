//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`. The old root is
//! stacked on top of the new one with `pivot_root(".", ".")`, made private
//! so the unmount does not propagate to the host, then lazily detached.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use stratum_common::error::{Result, StratumError};

/// Switches the process root to `new_root`.
///
/// Both directory descriptors are closed when this function returns,
/// including on every error path.
///
/// # Errors
///
/// Returns an error naming the failing step and path.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let target = new_root.display().to_string();
    let old_root = open_directory(Path::new("/"))?;
    let new_root = open_directory(new_root)?;

    fchdir(&new_root, &target)?;
    nix::unistd::pivot_root(".", ".")
        .map_err(|e| StratumError::syscall("pivot_root", target.as_str(), e))?;

    // The old root now sits on top of the new one; operate on it from there.
    fchdir(&old_root, &target)?;
    mount(
        None::<&str>,
        ".",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| StratumError::syscall("mount oldroot rprivate", target.as_str(), e))?;
    umount2(".", MntFlags::MNT_DETACH)
        .map_err(|e| StratumError::syscall("umount oldroot", target.as_str(), e))?;
    nix::unistd::chdir("/").map_err(|e| StratumError::syscall("chdir", "/", e))?;

    tracing::info!(new_root = %target, "performed pivot_root");
    Ok(())
}

fn open_directory(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
        .open(path)
        .map_err(|e| StratumError::syscall("open", path.display().to_string(), e))
}

fn fchdir(dir: &File, target: &str) -> Result<()> {
    nix::unistd::fchdir(dir).map_err(|e| StratumError::syscall("fchdir", target, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_directory_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        let err = open_directory(&file).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTDIR));
        assert!(err.to_string().starts_with("open '"));
    }

    #[test]
    fn missing_new_root_fails_before_pivot() {
        let err = pivot_root(Path::new("/nonexistent/rootfs")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(err.to_string().contains("/nonexistent/rootfs"));
    }
}
