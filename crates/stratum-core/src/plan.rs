//! Dry-run resolution of a container transition.
//!
//! Resolves every lookup table the pipeline consults without touching the
//! kernel, so a definition can be checked and inspected ahead of launch.

use std::fmt;

use nix::sched::CloneFlags;
use stratum_common::error::Result;
use stratum_common::types::{ContainerDefinition, RuntimeContext};

use crate::capability::{self, CapabilitySets};
use crate::filesystem::mount::{PlannedMount, Propagation};
use crate::filesystem::rootfs::effective_propagation;
use crate::namespace::user::IdMaps;
use crate::namespace::{NamespaceType, unshare_flags};
use crate::rlimit::{ResolvedRlimit, resolve_rlimits};

/// Everything the pipeline would do, fully resolved.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    /// Flags passed to `unshare(2)`.
    pub unshare_flags: CloneFlags,
    /// Namespaces joined by path, in order.
    pub joins: Vec<(NamespaceType, String)>,
    /// Propagation applied to `/` and the rootfs bind mount.
    pub propagation: Propagation,
    /// Mounts issued beneath the rootfs, in order.
    pub mounts: Vec<PlannedMount>,
    /// Identity maps, when a user namespace is created.
    pub id_maps: Option<IdMaps>,
    /// Capability masks.
    pub capabilities: CapabilitySets,
    /// Highest capability number considered.
    pub last_cap: u8,
    /// Whether `PR_SET_NO_NEW_PRIVS` is applied.
    pub no_new_privileges: bool,
    /// Resource limits, in order.
    pub rlimits: Vec<ResolvedRlimit>,
}

impl TransitionPlan {
    /// Resolves the plan for `definition` in `context`.
    ///
    /// # Errors
    ///
    /// Returns the configuration error the pipeline would raise.
    pub fn resolve(definition: &ContainerDefinition, context: &RuntimeContext) -> Result<Self> {
        let unshare_flags = unshare_flags(definition.namespaces())?;
        let joins = definition
            .namespaces()
            .iter()
            .filter_map(|req| {
                let path = req.path.as_ref()?;
                let ns = NamespaceType::from_name(&req.kind);
                Some(ns.map(|ns| (ns, path.display().to_string())))
            })
            .collect::<Result<Vec<_>>>()?;
        let propagation = effective_propagation(definition, context)?;
        let mounts = definition
            .mounts
            .iter()
            .map(|req| {
                let rootfs = Some(context.rootfs_path.as_path());
                PlannedMount::resolve(req, rootfs, context.host_privileged())
            })
            .collect();
        let id_maps = unshare_flags
            .contains(CloneFlags::CLONE_NEWUSER)
            .then(|| IdMaps::for_context(context));
        let last_cap = capability::last_cap();
        let capabilities =
            CapabilitySets::resolve(definition.process.capabilities.as_ref(), last_cap)?;
        let rlimits = resolve_rlimits(definition.rlimits())?;

        Ok(Self {
            unshare_flags,
            joins,
            propagation,
            mounts,
            id_maps,
            capabilities,
            last_cap,
            no_new_privileges: definition.process.no_new_privileges,
            rlimits,
        })
    }
}

impl fmt::Display for TransitionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "namespaces: {:?}", self.unshare_flags)?;
        for (ns, path) in &self.joins {
            writeln!(f, "  join {ns} {path}")?;
        }
        writeln!(f, "propagation: {}", self.propagation)?;
        writeln!(f, "mounts:")?;
        for mount in &self.mounts {
            let skipped = if mount.is_skipped() { " (skipped)" } else { "" };
            writeln!(
                f,
                "  {} -> {} type={} flags={:?} data={}{}{skipped}",
                mount.source,
                mount.target.display(),
                mount.kind,
                mount.flags.flags,
                mount.flags.data.as_deref().unwrap_or("-"),
                if mount.flags.is_read_only() { " ro" } else { "" },
            )?;
        }
        if let Some(maps) = &self.id_maps {
            writeln!(f, "uid_map: {}", maps.uid_map)?;
            writeln!(f, "gid_map: {}", maps.gid_map)?;
        }
        let caps = &self.capabilities;
        for (set, mask) in [
            ("effective", caps.effective),
            ("permitted", caps.permitted),
            ("inheritable", caps.inheritable),
            ("ambient", caps.ambient),
            ("bounding", caps.bounding),
        ] {
            let names: Vec<String> = mask
                .iter(self.last_cap)
                .map(capability::capability_name)
                .collect();
            writeln!(f, "{set}: [{}]", names.join(", "))?;
        }
        writeln!(f, "no_new_privileges: {}", self.no_new_privileges)?;
        for limit in &self.rlimits {
            writeln!(
                f,
                "rlimit {:?}: soft={} hard={}",
                limit.resource, limit.soft, limit.hard
            )?;
        }
        Ok(())
    }
}
