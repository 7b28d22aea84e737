//! Kernel-level tests for the container transition stages.
//!
//! Every stage irreversibly changes the calling process, so each test runs
//! its body in a forked child and inspects the exit status:
//! - `0` means the assertions held,
//! - `77` means the kernel refused the required namespaces and the test is skipped,
//! - anything else is a failure.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::print_stderr, unsafe_code)]

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use caps::{CapSet, Capability};
use nix::mount::{MsFlags, mount};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork, getegid, geteuid, getppid};
use stratum_common::types::{
    CapabilityNames, ContainerDefinition, Linux, MountRequest, NamespaceRequest, Process, Root,
    RlimitRequest, RuntimeContext,
};
use stratum_core::capability::set_capabilities;
use stratum_core::filesystem::mount::do_mounts;
use stratum_core::filesystem::rootfs::transition_root;
use stratum_core::namespace::set_namespaces;
use stratum_core::namespace::user::write_id_maps;
use stratum_core::pipeline::run_all;
use stratum_core::rlimit::{current_rlimit, set_rlimits};

const SKIP: i32 = 77;

/// Runs `body` in a forked child. Returns `None` when the child skipped.
fn in_child(body: impl FnOnce() -> i32) -> Option<bool> {
    // SAFETY: the child runs `body` and leaves through `_exit` without
    // returning into the test harness.
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = std::panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(101);
            // SAFETY: terminating the forked child without running atexit handlers.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, 0) => Some(true),
            WaitStatus::Exited(_, SKIP) => None,
            _ => Some(false),
        },
    }
}

fn assert_child(result: Option<bool>, name: &str) {
    match result {
        Some(passed) => assert!(passed, "{name} failed in child"),
        None => eprintln!("{name}: namespaces unavailable, skipped"),
    }
}

fn namespace(kind: &str) -> NamespaceRequest {
    NamespaceRequest {
        kind: kind.into(),
        path: None,
    }
}

/// Namespaces needed to mount: a user namespace unless already root.
fn mount_namespaces() -> Vec<NamespaceRequest> {
    if geteuid().is_root() {
        vec![namespace("mount")]
    } else {
        vec![namespace("user"), namespace("mount")]
    }
}

fn ns_inode(path: &Path) -> u64 {
    std::fs::metadata(path).expect("ns metadata").ino()
}

fn current_caps(set: CapSet) -> HashSet<Capability> {
    caps::read(None, set).expect("read caps")
}

#[test]
fn rlimit_nofile_round_trips() {
    let result = in_child(|| {
        let requests = [RlimitRequest {
            kind: "RLIMIT_NOFILE".into(),
            soft: 100,
            hard: 200,
        }];
        set_rlimits(&requests).unwrap();
        i32::from(current_rlimit("RLIMIT_NOFILE").unwrap() != (100, 200))
    });
    assert_child(result, "rlimit_nofile_round_trips");
}

#[test]
fn joined_namespace_matches_target_inode() {
    let result = in_child(|| {
        if !geteuid().is_root() {
            return SKIP;
        }
        let target = PathBuf::from(format!("/proc/{}/ns/uts", getppid()));
        let requests = [NamespaceRequest {
            kind: "uts".into(),
            path: Some(target.clone()),
        }];
        set_namespaces(&requests).unwrap();
        i32::from(ns_inode(Path::new("/proc/self/ns/uts")) != ns_inode(&target))
    });
    assert_child(result, "joined_namespace_matches_target_inode");
}

#[test]
fn fresh_namespace_differs_from_parent() {
    let result = in_child(|| {
        let before = ns_inode(Path::new("/proc/self/ns/user"));
        if set_namespaces(&[namespace("user")]).is_err() {
            return SKIP;
        }
        i32::from(ns_inode(Path::new("/proc/self/ns/user")) == before)
    });
    assert_child(result, "fresh_namespace_differs_from_parent");
}

#[test]
fn second_pid_namespace_setup_fails() {
    let result = in_child(|| {
        let requests = if geteuid().is_root() {
            vec![namespace("pid")]
        } else {
            vec![namespace("user"), namespace("pid")]
        };
        if set_namespaces(&requests).is_err() {
            return SKIP;
        }
        i32::from(set_namespaces(&[namespace("pid")]).is_ok())
    });
    assert_child(result, "second_pid_namespace_setup_fails");
}

#[test]
fn ambient_net_bind_service_and_shrinking_bounding_set() {
    let result = in_child(|| {
        if set_namespaces(&[namespace("user")]).is_err() {
            return SKIP;
        }
        let bounding_before = current_caps(CapSet::Bounding);
        // Raising an ambient capability requires it to be inheritable already.
        caps::raise(None, CapSet::Inheritable, Capability::CAP_NET_BIND_SERVICE).unwrap();

        let nbs = vec!["net_bind_service".to_string()];
        let names = CapabilityNames {
            effective: nbs.clone(),
            permitted: nbs.clone(),
            inheritable: nbs.clone(),
            ambient: nbs.clone(),
            bounding: nbs,
        };
        set_capabilities(Some(&names), false).unwrap();

        let expected: HashSet<_> = [Capability::CAP_NET_BIND_SERVICE].into_iter().collect();
        let ambient = current_caps(CapSet::Ambient);
        let bounding = current_caps(CapSet::Bounding);
        let ok = ambient == expected
            && bounding.is_subset(&bounding_before)
            && bounding == expected
            && current_caps(CapSet::Effective) == expected;
        i32::from(!ok)
    });
    assert_child(result, "ambient_net_bind_service_and_shrinking_bounding_set");
}

#[test]
fn unknown_capability_fails_before_any_change() {
    let names = CapabilityNames {
        bounding: vec!["CAP_TELEPORT".into()],
        ..CapabilityNames::default()
    };
    let err = set_capabilities(Some(&names), false).unwrap_err();
    assert_eq!(err.to_string(), "unknown capability: CAP_TELEPORT");
}

#[test]
fn root_transition_detaches_host_root() {
    let base = tempfile::tempdir().expect("tempdir");
    let source = base.path().join("source");
    let rootfs = base.path().join("rootfs");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&rootfs).unwrap();
    std::fs::write(source.join("marker"), "stratum").unwrap();
    let host_path = base.path().to_path_buf();

    let result = in_child(|| {
        let privileged = geteuid().is_root();
        let requests = mount_namespaces();
        // Capture the host identity before the user namespace hides it.
        let ctx = RuntimeContext::new(geteuid().as_raw(), getegid().as_raw(), rootfs.clone());
        if set_namespaces(&requests).is_err() {
            return SKIP;
        }
        if !privileged && write_id_maps(&ctx).is_err() {
            return SKIP;
        }

        let definition = ContainerDefinition {
            root: Root {
                path: source.clone(),
            },
            mounts: vec![MountRequest {
                destination: "/tmp".into(),
                source: None,
                kind: "tmpfs".into(),
                options: Some(vec!["nosuid".into(), "nodev".into(), "mode=1777".into()]),
            }],
            ..ContainerDefinition::default()
        };
        transition_root(&definition, &ctx).unwrap();

        let marker = std::fs::read_to_string("/marker").unwrap_or_default();
        let ok = marker == "stratum"
            && !host_path.exists()
            && Path::new("/tmp").is_dir()
            && std::env::current_dir().unwrap() == Path::new("/")
            && transition_root(&definition, &ctx).is_err();
        i32::from(!ok)
    });
    assert_child(result, "root_transition_detaches_host_root");
}

#[test]
fn read_only_bind_is_remounted_after_mounting() {
    let base = tempfile::tempdir().expect("tempdir");
    let source = base.path().join("data");
    let rootfs = base.path().join("rootfs");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&rootfs).unwrap();

    let result = in_child(|| {
        let ctx = RuntimeContext::new(geteuid().as_raw(), getegid().as_raw(), rootfs.clone());
        if set_namespaces(&mount_namespaces()).is_err() {
            return SKIP;
        }
        if !ctx.host_privileged() && write_id_maps(&ctx).is_err() {
            return SKIP;
        }
        // Keep the bind mount out of the host's peer groups.
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
        .unwrap();

        let requests = [MountRequest {
            destination: "/data".into(),
            source: Some(source.display().to_string()),
            kind: "bind".into(),
            options: Some(vec!["rbind".into(), "ro".into()]),
        }];
        do_mounts(&requests, Some(rootfs.as_path()), ctx.host_privileged()).unwrap();

        let err = std::fs::write(rootfs.join("data").join("file"), "x").unwrap_err();
        i32::from(err.kind() != std::io::ErrorKind::ReadOnlyFilesystem)
    });
    assert_child(result, "read_only_bind_is_remounted_after_mounting");
    assert!(!source.join("file").exists());
}

#[test]
fn run_all_completes_with_user_and_mount_namespaces() {
    let base = tempfile::tempdir().expect("tempdir");
    let source = base.path().join("source");
    let rootfs = base.path().join("rootfs");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&rootfs).unwrap();
    std::fs::write(source.join("marker"), "stratum").unwrap();
    let host_path = base.path().to_path_buf();

    let result = in_child(|| {
        // Writing a full-range map from inside the new namespace needs
        // privileges root does not keep there, so root skips the user namespace.
        let ctx = RuntimeContext::new(geteuid().as_raw(), getegid().as_raw(), rootfs.clone());
        let definition = ContainerDefinition {
            root: Root {
                path: source.clone(),
            },
            mounts: vec![MountRequest {
                destination: "/tmp".into(),
                source: None,
                kind: "tmpfs".into(),
                options: Some(vec!["nosuid".into(), "nodev".into()]),
            }],
            process: Process {
                rlimits: vec![RlimitRequest {
                    kind: "RLIMIT_NOFILE".into(),
                    soft: 64,
                    hard: 128,
                }],
                ..Process::default()
            },
            linux: Linux {
                namespaces: mount_namespaces(),
                rootfs_propagation: None,
            },
        };

        let flags = match run_all(&definition, &ctx) {
            Ok(flags) => flags,
            Err(err) if err.raw_os_error() == Some(libc::EPERM) => return SKIP,
            Err(err) => {
                eprintln!("run_all failed: {err}");
                return 1;
            }
        };

        let marker = std::fs::read_to_string("/marker").unwrap_or_default();
        let ok = marker == "stratum"
            && !host_path.exists()
            && Path::new("/tmp").is_dir()
            && flags.contains(nix::sched::CloneFlags::CLONE_NEWNS)
            && current_rlimit("RLIMIT_NOFILE").unwrap() == (64, 128)
            && current_caps(CapSet::Bounding).is_empty();
        i32::from(!ok)
    });
    assert_child(result, "run_all_completes_with_user_and_mount_namespaces");
}
