use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slipway_orchestrate::FailurePolicy;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "slipway")]
#[command(
    author,
    version,
    about = "Deploy interdependent contracts from a declarative plan"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SLIPWAY_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the Slipway.toml configuration file.
    #[arg(long, alias = "conf", env = "SLIPWAY_CONFIG", default_value = "Slipway.toml", global = true)]
    pub config: PathBuf,

    /// Override the address book directory from the configuration file.
    #[arg(long, env = "SLIPWAY_BOOK_DIR", global = true)]
    pub book_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a plan against a configured network.
    Deploy {
        /// The target network name, as configured in Slipway.toml.
        #[arg(short, long, env = "SLIPWAY_NETWORK")]
        network: String,

        /// Path to the deployment plan file.
        #[arg(short, long, env = "SLIPWAY_PLAN")]
        plan: PathBuf,

        /// What to do with the rest of the plan when a unit fails:
        /// strict aborts everything, lenient continues independent units.
        #[arg(long, env = "SLIPWAY_FAILURE_POLICY", default_value_t = FailurePolicy::Strict)]
        failure_policy: FailurePolicy,

        /// Submission attempts per unit before a transient error is terminal.
        #[arg(long, env = "SLIPWAY_MAX_ATTEMPTS", default_value_t = 3)]
        max_attempts: usize,

        /// Write the final manifest as JSON to this path.
        #[arg(long)]
        manifest_out: Option<PathBuf>,
    },

    /// Validate a plan and print the resolved deployment order without
    /// touching the network.
    Plan {
        /// The target network name, used to consult prior confirmed records.
        #[arg(short, long, env = "SLIPWAY_NETWORK")]
        network: String,

        /// Path to the deployment plan file.
        #[arg(short, long, env = "SLIPWAY_PLAN")]
        plan: PathBuf,
    },

    /// Render the manifest for a network from the address book.
    Manifest {
        /// The network whose records to render.
        #[arg(short, long, env = "SLIPWAY_NETWORK")]
        network: String,

        /// Write the manifest as JSON to this path instead of a table.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
