//! `strm plan` — Resolve a bundle and print the transition without applying it.

use stratum_common::config::RuntimeConfig;
use stratum_core::plan::TransitionPlan;

use super::BundleArgs;

/// Executes the `plan` command.
///
/// Resolves every namespace, mount, propagation, capability, and rlimit
/// name of the bundle. Nothing is applied to the current process.
///
/// # Errors
///
/// Returns an error if the bundle cannot be loaded or a name does not resolve.
pub fn execute(args: &BundleArgs, config: &RuntimeConfig) -> anyhow::Result<()> {
    let (definition, context) = super::load_bundle(args, config)?;
    let plan = TransitionPlan::resolve(&definition, &context)?;

    println!("Transition plan for: {}", args.bundle.display());
    println!("  root: {}", definition.root.path.display());
    println!("  rootfs: {}", context.rootfs_path.display());
    println!();
    print!("{plan}");
    Ok(())
}
