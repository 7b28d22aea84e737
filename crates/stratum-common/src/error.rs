//! Unified error types for the Stratum workspace.
//!
//! Errors fall into two fatal families: configuration errors (a name in the
//! container definition did not resolve through one of the fixed lookup
//! tables) and kernel operation errors (a syscall failed and carries its OS
//! error code). Best-effort failures tolerated during capability setup never
//! reach this type.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StratumError {
    /// A namespace request names a type outside the namespace table.
    #[error("invalid namespace type: {name}")]
    InvalidNamespace {
        /// The unrecognised namespace type.
        name: String,
    },

    /// A rootfs propagation mode is not a known propagation name.
    #[error("invalid rootfs propagation: {name}")]
    InvalidPropagation {
        /// The unrecognised propagation name.
        name: String,
    },

    /// An rlimit request names a resource outside the rlimit table.
    #[error("invalid rlimit '{name}'")]
    InvalidRlimit {
        /// The unrecognised resource name.
        name: String,
    },

    /// A capability name does not resolve on this kernel.
    #[error("unknown capability: {name}")]
    UnknownCapability {
        /// The unrecognised capability name.
        name: String,
    },

    /// A kernel operation failed.
    #[error("{operation} '{target}': {source}")]
    Syscall {
        /// Name of the failing operation (`unshare`, `mount`, `setns`, ...).
        operation: &'static str,
        /// Contextual argument: a path, a resource name, or a capability.
        target: String,
        /// Underlying OS error, carrying the raw errno.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StratumError {
    /// Builds a [`StratumError::Syscall`] from an operation name, its
    /// contextual argument, and the failing OS error.
    pub fn syscall(
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<std::io::Error>,
    ) -> Self {
        Self::Syscall {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }

    /// Returns `true` when the error stems from the container definition
    /// rather than from the kernel.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidNamespace { .. }
                | Self::InvalidPropagation { .. }
                | Self::InvalidRlimit { .. }
                | Self::UnknownCapability { .. }
                | Self::Config { .. }
                | Self::Serialization { .. }
        )
    }

    /// Returns the raw OS error code carried by a kernel operation error.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Syscall { source, .. } | Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_error_names_operation_and_target() {
        let err = StratumError::syscall(
            "mount",
            "/dev/shm",
            std::io::Error::from_raw_os_error(1),
        );
        let message = err.to_string();
        assert!(message.starts_with("mount '/dev/shm': "));
        assert_eq!(err.raw_os_error(), Some(1));
        assert!(!err.is_config_error());
    }

    #[test]
    fn rlimit_error_names_resource() {
        let err = StratumError::InvalidRlimit {
            name: "BOGUS".into(),
        };
        assert_eq!(err.to_string(), "invalid rlimit 'BOGUS'");
        assert!(err.is_config_error());
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn namespace_error_names_type() {
        let err = StratumError::InvalidNamespace {
            name: "time".into(),
        };
        assert_eq!(err.to_string(), "invalid namespace type: time");
    }
}
