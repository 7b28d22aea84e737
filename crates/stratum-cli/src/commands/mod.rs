//! CLI command definitions and dispatch.

pub mod apply;
pub mod plan;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use stratum_common::config::RuntimeConfig;
use stratum_common::types::{ContainerDefinition, RuntimeContext};

/// Stratum — privileged isolation transitions for OCI bundles.
#[derive(Parser, Debug)]
#[command(name = "strm", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a runtime configuration file.
    #[arg(long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a bundle and print the transition without applying it.
    Plan(BundleArgs),
    /// Apply the full transition to the current process.
    Apply(BundleArgs),
}

/// Arguments shared by commands that operate on a bundle.
#[derive(Args, Debug)]
pub struct BundleArgs {
    /// OCI bundle directory containing `config.json`.
    #[arg(default_value = ".")]
    pub bundle: PathBuf,

    /// Directory the container root is bind-mounted onto.
    #[arg(long)]
    pub rootfs: Option<PathBuf>,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    match cli.command {
        Command::Plan(args) => plan::execute(&args, &config),
        Command::Apply(args) => apply::execute(&args, &config),
    }
}

/// Loads the bundle definition and the context of the launching user.
///
/// A relative `root.path` is resolved against the bundle directory.
pub(crate) fn load_bundle(
    args: &BundleArgs,
    config: &RuntimeConfig,
) -> anyhow::Result<(ContainerDefinition, RuntimeContext)> {
    let mut definition = ContainerDefinition::load(&args.bundle)
        .with_context(|| format!("loading bundle {}", args.bundle.display()))?;
    definition.root.path = resolve_root(&args.bundle, &definition.root.path);

    let mut context = config.context(
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    );
    if let Some(rootfs) = &args.rootfs {
        context.rootfs_path.clone_from(rootfs);
    }
    Ok((definition, context))
}

fn resolve_root(bundle: &Path, root: &Path) -> PathBuf {
    if root.is_absolute() {
        root.to_path_buf()
    } else {
        bundle.join(root)
    }
}
