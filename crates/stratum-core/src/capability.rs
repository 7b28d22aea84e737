//! Linux capability management for least-privilege execution.
//!
//! Requested capability names are resolved into two-word masks, one per
//! capability set. Applying them resets the ambient set, raises the
//! requested ambient capabilities, shrinks the bounding set, and finally
//! installs effective, permitted and inheritable with a single `capset(2)`.

use std::str::FromStr;

use caps::Capability;
use nix::errno::Errno;
use stratum_common::constants::CAP_LAST_CAP_PATH;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::CapabilityNames;

/// `_LINUX_CAPABILITY_VERSION_3`: 64-bit capabilities in two data words.
const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// Highest capability number a two-word mask can hold.
const MAX_MASK_CAP: u8 = 63;

#[allow(clippy::cast_sign_loss)]
const AMBIENT_CLEAR_ALL: libc::c_ulong = libc::PR_CAP_AMBIENT_CLEAR_ALL as libc::c_ulong;

#[allow(clippy::cast_sign_loss)]
const AMBIENT_RAISE: libc::c_ulong = libc::PR_CAP_AMBIENT_RAISE as libc::c_ulong;

/// A 64-bit capability mask stored as two 32-bit words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilityMask([u32; 2]);

impl CapabilityMask {
    /// Mask with no capability set.
    #[must_use]
    pub const fn empty() -> Self {
        Self([0; 2])
    }

    /// Sets the bit for capability number `cap`.
    pub fn insert(&mut self, cap: u8) {
        debug_assert!(cap <= MAX_MASK_CAP);
        self.0[usize::from(cap / 32)] |= 1 << (cap % 32);
    }

    /// Whether the bit for capability number `cap` is set.
    #[must_use]
    pub const fn contains(&self, cap: u8) -> bool {
        cap <= MAX_MASK_CAP && self.0[(cap / 32) as usize] & (1 << (cap % 32)) != 0
    }

    /// Low and high words, as passed to `capset(2)`.
    #[must_use]
    pub const fn words(&self) -> [u32; 2] {
        self.0
    }

    /// Whether no bit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0[0] == 0 && self.0[1] == 0
    }

    /// Resolves a list of capability names into a mask.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::UnknownCapability`] for the first name that
    /// does not resolve or exceeds `last_cap`.
    pub fn from_names<S: AsRef<str>>(names: &[S], last_cap: u8) -> Result<Self> {
        let mut mask = Self::empty();
        for name in names {
            mask.insert(resolve_capability(name.as_ref(), last_cap)?);
        }
        Ok(mask)
    }

    /// Capability numbers set in this mask, up to and including `last_cap`.
    pub fn iter(self, last_cap: u8) -> impl Iterator<Item = u8> {
        (0..=last_cap.min(MAX_MASK_CAP)).filter(move |&cap| self.contains(cap))
    }
}

/// Resolves a capability name into its number.
///
/// Matching ignores case and accepts names with or without the `CAP_`
/// prefix, so `net_bind_service` and `CAP_NET_BIND_SERVICE` are equivalent.
///
/// # Errors
///
/// Returns [`StratumError::UnknownCapability`] if the name is unknown or
/// names a capability beyond `last_cap`.
pub fn resolve_capability(name: &str, last_cap: u8) -> Result<u8> {
    let unknown = || StratumError::UnknownCapability {
        name: name.to_string(),
    };
    let upper = name.trim().to_ascii_uppercase();
    let canonical = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    let cap = Capability::from_str(&canonical).map_err(|_| unknown())?;
    if cap.index() > last_cap.min(MAX_MASK_CAP) {
        return Err(unknown());
    }
    Ok(cap.index())
}

/// Highest capability number supported by the running kernel.
///
/// Falls back to the highest capability this build knows about when
/// procfs does not expose the value.
#[must_use]
pub fn last_cap() -> u8 {
    match std::fs::read_to_string(CAP_LAST_CAP_PATH) {
        Ok(content) => match content.trim().parse::<u8>() {
            Ok(cap) => return cap.min(MAX_MASK_CAP),
            Err(e) => tracing::debug!(error = %e, "unparseable cap_last_cap"),
        },
        Err(e) => tracing::debug!(error = %e, "cap_last_cap unavailable"),
    }
    caps::all()
        .iter()
        .map(Capability::index)
        .max()
        .unwrap_or(0)
        .min(MAX_MASK_CAP)
}

/// Resolved masks for the five capability sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySets {
    /// Effective set.
    pub effective: CapabilityMask,
    /// Permitted set.
    pub permitted: CapabilityMask,
    /// Inheritable set.
    pub inheritable: CapabilityMask,
    /// Ambient set.
    pub ambient: CapabilityMask,
    /// Bounding set.
    pub bounding: CapabilityMask,
}

impl CapabilitySets {
    /// Resolves every requested set. Absent names yield empty masks.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unresolvable capability.
    pub fn resolve(names: Option<&CapabilityNames>, last_cap: u8) -> Result<Self> {
        let Some(names) = names else {
            return Ok(Self::default());
        };
        Ok(Self {
            effective: CapabilityMask::from_names(&names.effective, last_cap)?,
            inheritable: CapabilityMask::from_names(&names.inheritable, last_cap)?,
            ambient: CapabilityMask::from_names(&names.ambient, last_cap)?,
            bounding: CapabilityMask::from_names(&names.bounding, last_cap)?,
            permitted: CapabilityMask::from_names(&names.permitted, last_cap)?,
        })
    }
}

/// Resolves and applies the requested capabilities to the calling thread.
///
/// # Errors
///
/// Returns an error for unknown capability names and for fatal kernel failures.
pub fn set_capabilities(names: Option<&CapabilityNames>, no_new_privileges: bool) -> Result<()> {
    let last_cap = last_cap();
    let sets = CapabilitySets::resolve(names, last_cap)?;
    apply_capabilities(&sets, no_new_privileges, last_cap)
}

/// Applies resolved capability sets.
///
/// The ambient reset, each ambient raise, and each bounding drop tolerate
/// `EINVAL` and `EPERM`; the bulk `capset(2)` and `PR_SET_NO_NEW_PRIVS`
/// are fatal on any failure.
///
/// # Errors
///
/// Returns an error naming the failing operation.
pub fn apply_capabilities(
    sets: &CapabilitySets,
    no_new_privileges: bool,
    last_cap: u8,
) -> Result<()> {
    tracing::info!(
        ambient = ?sets.ambient.words(),
        bounding = ?sets.bounding.words(),
        no_new_privileges,
        "applying capabilities"
    );

    tolerate(
        prctl(libc::PR_CAP_AMBIENT, AMBIENT_CLEAR_ALL, 0),
        "prctl reset ambient",
        "all",
    )?;

    for cap in sets.ambient.iter(last_cap) {
        tolerate(
            prctl(libc::PR_CAP_AMBIENT, AMBIENT_RAISE, cap.into()),
            "prctl ambient raise",
            &capability_name(cap),
        )?;
    }

    for cap in (0..=last_cap).filter(|&cap| !sets.bounding.contains(cap)) {
        tolerate(
            prctl(libc::PR_CAPBSET_DROP, cap.into(), 0),
            "prctl drop bounding",
            &capability_name(cap),
        )?;
    }

    capset(sets)?;

    if no_new_privileges {
        nix::sys::prctl::set_no_new_privs()
            .map_err(|e| StratumError::syscall("prctl", "no new privs", e))?;
    }
    Ok(())
}

/// Name of a capability number, or the number itself if this build does
/// not know it.
#[must_use]
pub fn capability_name(cap: u8) -> String {
    caps::all()
        .into_iter()
        .find(|c| c.index() == cap)
        .map_or_else(|| cap.to_string(), |c| c.to_string())
}

/// Turns `EINVAL` and `EPERM` into a logged non-fatal outcome.
///
/// Both mean the capability does not exist on this kernel or is already
/// out of reach; any other errno is fatal.
fn tolerate(result: nix::Result<()>, operation: &'static str, target: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(errno @ (Errno::EINVAL | Errno::EPERM)) => {
            tracing::debug!(operation, target, %errno, "tolerated capability failure");
            Ok(())
        }
        Err(errno) => Err(StratumError::syscall(operation, target, errno)),
    }
}

#[allow(unsafe_code)]
fn prctl(option: libc::c_int, arg2: libc::c_ulong, arg3: libc::c_ulong) -> nix::Result<()> {
    let zero: libc::c_ulong = 0;
    // SAFETY: the capability prctl options only read integer arguments.
    let ret = unsafe { libc::prctl(option, arg2, arg3, zero, zero) };
    Errno::result(ret).map(drop)
}

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

#[allow(unsafe_code)]
fn capset(sets: &CapabilitySets) -> Result<()> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data: [CapUserData; 2] = std::array::from_fn(|word| CapUserData {
        effective: sets.effective.words()[word],
        permitted: sets.permitted.words()[word],
        inheritable: sets.inheritable.words()[word],
    });
    // SAFETY: header and data are valid, correctly laid out for version 3,
    // and live for the duration of the call.
    let ret = unsafe { libc::syscall(libc::SYS_capset, &raw mut header, data.as_ptr()) };
    Errno::result(ret)
        .map(drop)
        .map_err(|e| StratumError::syscall("capset", "effective/permitted/inheritable", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_with_and_without_prefix() {
        let last = 40;
        assert_eq!(resolve_capability("net_bind_service", last).unwrap(), 10);
        assert_eq!(resolve_capability("CAP_NET_BIND_SERVICE", last).unwrap(), 10);
        assert_eq!(resolve_capability("cap_chown", last).unwrap(), 0);
        assert_eq!(resolve_capability(" Sys_Admin ", last).unwrap(), 21);
    }

    #[test]
    fn unknown_capability_is_named() {
        let err = resolve_capability("CAP_FLY", 40).unwrap_err();
        assert_eq!(err.to_string(), "unknown capability: CAP_FLY");
    }

    #[test]
    fn capability_beyond_kernel_is_rejected() {
        // CAP_AUDIT_READ is 37.
        assert!(resolve_capability("audit_read", 36).is_err());
        assert_eq!(resolve_capability("audit_read", 37).unwrap(), 37);
    }

    #[test]
    fn mask_splits_into_words() {
        let mut mask = CapabilityMask::empty();
        mask.insert(10);
        mask.insert(37);
        assert_eq!(mask.words(), [1 << 10, 1 << 5]);
        assert!(mask.contains(37));
        assert!(!mask.contains(36));
        assert!(!mask.contains(200));
        assert_eq!(mask.iter(40).collect::<Vec<_>>(), vec![10, 37]);
        assert_eq!(mask.iter(20).collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn sets_resolve_per_category() {
        let names = CapabilityNames {
            effective: vec!["CAP_KILL".into()],
            ambient: vec!["net_bind_service".into()],
            bounding: vec!["CAP_KILL".into(), "CAP_NET_BIND_SERVICE".into()],
            ..CapabilityNames::default()
        };
        let sets = CapabilitySets::resolve(Some(&names), 40).unwrap();
        assert!(sets.effective.contains(5));
        assert!(sets.permitted.is_empty());
        assert!(sets.inheritable.is_empty());
        assert_eq!(sets.ambient.iter(40).collect::<Vec<_>>(), vec![10]);
        assert_eq!(sets.bounding.iter(40).collect::<Vec<_>>(), vec![5, 10]);
    }

    #[test]
    fn absent_capabilities_resolve_empty() {
        assert_eq!(
            CapabilitySets::resolve(None, 40).unwrap(),
            CapabilitySets::default()
        );
    }

    #[test]
    fn last_cap_is_within_mask() {
        let last = last_cap();
        assert!(last >= 31);
        assert!(last <= MAX_MASK_CAP);
    }

    #[test]
    fn only_einval_and_eperm_are_tolerated() {
        assert!(tolerate(Err(Errno::EINVAL), "prctl ambient raise", "10").is_ok());
        assert!(tolerate(Err(Errno::EPERM), "prctl drop bounding", "10").is_ok());
        let err = tolerate(Err(Errno::EFAULT), "prctl drop bounding", "CAP_KILL").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EFAULT));
        assert!(err.to_string().starts_with("prctl drop bounding 'CAP_KILL'"));
    }

    #[test]
    fn capability_names_render() {
        assert_eq!(capability_name(10), "CAP_NET_BIND_SERVICE");
        assert_eq!(capability_name(63), "63");
    }
}
