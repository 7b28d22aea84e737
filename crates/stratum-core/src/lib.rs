//! # stratum-core
//!
//! The privileged state-transition engine of the Stratum container launcher.
//!
//! Components run strictly in this order inside the to-be-contained process:
//! - **Namespaces**: unshare the requested namespaces and join existing ones.
//! - **Filesystem**: build the mount plan and `pivot_root` into it.
//! - **User namespace**: write the uid/gid maps.
//! - **Capabilities**: reset ambient, shrink bounding, and `capset`.
//! - **Rlimits**: apply resource limits.
//!
//! [`pipeline::Transition`] enforces the order at compile time. All unsafe
//! system calls are encapsulated in safe wrappers with `// SAFETY:` notes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod filesystem;
pub mod namespace;
pub mod pipeline;
pub mod plan;
pub mod rlimit;
