//! `strm apply` — Apply the full transition to the current process.

use stratum_common::config::RuntimeConfig;
use stratum_core::pipeline;

use super::BundleArgs;

/// Executes the `apply` command.
///
/// Runs namespace isolation, the root transition, identity mapping, and
/// the capability and rlimit restrictions in order. The process is left
/// inside the container; on failure it must exit without running anything.
///
/// # Errors
///
/// Returns the first error raised by any stage.
pub fn execute(args: &BundleArgs, config: &RuntimeConfig) -> anyhow::Result<()> {
    let (definition, context) = super::load_bundle(args, config)?;
    let flags = pipeline::run_all(&definition, &context)?;
    tracing::info!(?flags, bundle = %args.bundle.display(), "container transition applied");
    println!("transition applied ({flags:?})");
    Ok(())
}
