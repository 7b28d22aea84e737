//! Process resource limits.
//!
//! Each requested `RLIMIT_*` name is resolved through a fixed table and
//! applied with `setrlimit(2)`. No defaults are invented: an empty request
//! list leaves every limit untouched.

use nix::sys::resource::{Resource, getrlimit, setrlimit};
use stratum_common::error::{Result, StratumError};
use stratum_common::types::RlimitRequest;

/// Resource limit names accepted in a container definition.
const RLIMITS: [(&str, Resource); 16] = [
    ("RLIMIT_AS", Resource::RLIMIT_AS),
    ("RLIMIT_CORE", Resource::RLIMIT_CORE),
    ("RLIMIT_CPU", Resource::RLIMIT_CPU),
    ("RLIMIT_DATA", Resource::RLIMIT_DATA),
    ("RLIMIT_FSIZE", Resource::RLIMIT_FSIZE),
    ("RLIMIT_LOCKS", Resource::RLIMIT_LOCKS),
    ("RLIMIT_MEMLOCK", Resource::RLIMIT_MEMLOCK),
    ("RLIMIT_MSGQUEUE", Resource::RLIMIT_MSGQUEUE),
    ("RLIMIT_NICE", Resource::RLIMIT_NICE),
    ("RLIMIT_NOFILE", Resource::RLIMIT_NOFILE),
    ("RLIMIT_NPROC", Resource::RLIMIT_NPROC),
    ("RLIMIT_RSS", Resource::RLIMIT_RSS),
    ("RLIMIT_RTPRIO", Resource::RLIMIT_RTPRIO),
    ("RLIMIT_RTTIME", Resource::RLIMIT_RTTIME),
    ("RLIMIT_SIGPENDING", Resource::RLIMIT_SIGPENDING),
    ("RLIMIT_STACK", Resource::RLIMIT_STACK),
];

/// Resolves an `RLIMIT_*` name.
///
/// # Errors
///
/// Returns [`StratumError::InvalidRlimit`] for names outside the table.
pub fn resource_from_name(name: &str) -> Result<Resource> {
    RLIMITS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|&(_, resource)| resource)
        .ok_or_else(|| StratumError::InvalidRlimit {
            name: name.to_string(),
        })
}

/// A request whose resource name has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRlimit {
    /// Kernel resource.
    pub resource: Resource,
    /// Soft limit.
    pub soft: u64,
    /// Hard limit.
    pub hard: u64,
}

/// Resolves every request without applying any.
///
/// # Errors
///
/// Returns an error naming the first unknown resource.
pub fn resolve_rlimits(requests: &[RlimitRequest]) -> Result<Vec<ResolvedRlimit>> {
    requests
        .iter()
        .map(|req| {
            Ok(ResolvedRlimit {
                resource: resource_from_name(&req.kind)?,
                soft: req.soft,
                hard: req.hard,
            })
        })
        .collect()
}

/// Applies the requested limits, in order.
///
/// # Errors
///
/// Returns an error naming the resource whose name is unknown or whose
/// `setrlimit(2)` call failed. Limits applied before the failure stay applied.
pub fn set_rlimits(requests: &[RlimitRequest]) -> Result<()> {
    for req in requests {
        let resource = resource_from_name(&req.kind)?;
        setrlimit(resource, req.soft, req.hard)
            .map_err(|e| StratumError::syscall("setrlimit", req.kind.as_str(), e))?;
        tracing::debug!(resource = %req.kind, soft = req.soft, hard = req.hard, "set rlimit");
    }
    Ok(())
}

/// Reads the current `(soft, hard)` limits of a named resource.
///
/// # Errors
///
/// Returns an error if the name is unknown or `getrlimit(2)` fails.
pub fn current_rlimit(name: &str) -> Result<(u64, u64)> {
    let resource = resource_from_name(name)?;
    getrlimit(resource).map_err(|e| StratumError::syscall("getrlimit", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, soft: u64, hard: u64) -> RlimitRequest {
        RlimitRequest {
            kind: kind.into(),
            soft,
            hard,
        }
    }

    #[test]
    fn every_table_name_resolves() {
        for (name, resource) in RLIMITS {
            assert_eq!(resource_from_name(name).unwrap(), resource);
        }
    }

    #[test]
    fn bogus_rlimit_is_named() {
        let err = set_rlimits(&[request("BOGUS", 1, 1)]).unwrap_err();
        assert_eq!(err.to_string(), "invalid rlimit 'BOGUS'");
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(resource_from_name("rlimit_nofile").is_err());
        assert!(resource_from_name("NOFILE").is_err());
    }

    #[test]
    fn empty_list_is_a_no_op() {
        let before = current_rlimit("RLIMIT_NOFILE").unwrap();
        set_rlimits(&[]).unwrap();
        assert_eq!(current_rlimit("RLIMIT_NOFILE").unwrap(), before);
    }

    #[test]
    fn resolve_keeps_order_and_values() {
        let resolved =
            resolve_rlimits(&[request("RLIMIT_CORE", 0, 0), request("RLIMIT_NOFILE", 100, 200)])
                .unwrap();
        assert_eq!(resolved[0].resource, Resource::RLIMIT_CORE);
        assert_eq!((resolved[1].soft, resolved[1].hard), (100, 200));
    }

    #[test]
    fn reapplying_current_limit_succeeds() {
        let (soft, hard) = current_rlimit("RLIMIT_CORE").unwrap();
        set_rlimits(&[request("RLIMIT_CORE", soft, hard)]).unwrap();
        assert_eq!(current_rlimit("RLIMIT_CORE").unwrap(), (soft, hard));
    }
}
