//! # stratum-common
//!
//! Shared container definition types, error definitions, runtime
//! configuration, and constants used across the Stratum workspace.
//!
//! This crate is the leaf of the dependency graph. It performs no kernel
//! operations; everything here is plain data consumed by `stratum-core`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
