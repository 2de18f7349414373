//! slipway is a CLI tool that deploys interdependent contracts from a
//! declarative plan, resuming safely across runs.

mod cli;
mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command};
use config::SlipwayConfig;
use slipway_orchestrate::{
    AddressBook, ConsoleReporter, DeploymentExecutor, DeploymentPlan, ExecutorConfig,
    FailurePolicy, JsonRpcChainClient, Manifest, NetworkProfile, NetworkProfileRegistry, resolve,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = SlipwayConfig::load(&cli.config)?;
    if let Some(book_dir) = cli.book_dir {
        config.book_dir = book_dir;
    }

    match cli.command {
        Command::Deploy {
            network,
            plan,
            failure_policy,
            max_attempts,
            manifest_out,
        } => {
            deploy(
                &config,
                &network,
                &plan,
                failure_policy,
                max_attempts,
                manifest_out.as_deref(),
            )
            .await
        }
        Command::Plan { network, plan } => preview(&config, &network, &plan),
        Command::Manifest { network, out } => manifest(&config, &network, out.as_deref()),
    }
}

async fn deploy(
    config: &SlipwayConfig,
    network: &str,
    plan_path: &Path,
    failure_policy: FailurePolicy,
    max_attempts: usize,
    manifest_out: Option<&Path>,
) -> Result<()> {
    let plan = load_plan_for(network, plan_path)?;
    let registry = config.registry()?;
    let catalog = config.catalog()?;
    let profile = lookup_profile(&registry, network)?;

    tracing::info!(
        network,
        chain_id = profile.chain_id,
        plan = %plan_path.display(),
        units = plan.units.len(),
        "Starting deployment run"
    );

    let chain = JsonRpcChainClient::new(&profile.rpc_url)?;
    let executor_config = ExecutorConfig {
        max_attempts,
        failure_policy,
        ..Default::default()
    };
    let executor = DeploymentExecutor::new(profile.clone(), chain, executor_config);
    let mut book = AddressBook::open(&config.book_dir)?;
    let mut reporter = ConsoleReporter;

    let result = executor
        .execute(&plan, &catalog, &mut book, &mut reporter)
        .await;

    // The manifest reflects whatever the book recorded, even when the run
    // stopped early (timeout leaves a pending record behind).
    let manifest = Manifest::from_book(&mut book, network)?;
    println!("{}", manifest.render_table());
    if let Some(out) = manifest_out {
        manifest.write_json(out)?;
    }
    let summary = result?;

    if let Some((instance, reason)) = summary.failed.first() {
        anyhow::bail!("Deployment of unit '{instance}' failed: {reason}");
    }
    if let Some(instance) = summary.abandoned.first() {
        anyhow::bail!("Unit '{instance}' was not deployed because an earlier unit failed");
    }
    tracing::info!(
        network,
        deployed = summary.deployed.len(),
        skipped = summary.skipped.len(),
        "Deployment complete"
    );
    Ok(())
}

/// Dry run: validate the plan and print the order units would deploy in.
fn preview(config: &SlipwayConfig, network: &str, plan_path: &Path) -> Result<()> {
    let plan = load_plan_for(network, plan_path)?;
    let catalog = config.catalog()?;
    lookup_profile(&config.registry()?, network)?;

    let mut book = AddressBook::open(&config.book_dir)?;
    let confirmed = book.confirmed_addresses(network)?;
    let resolved = resolve(&plan, &catalog, &confirmed)?;

    for skipped in &resolved.already_confirmed {
        println!("{skipped} (already confirmed)");
    }
    for id in &resolved.order {
        println!("{id}");
    }
    Ok(())
}

fn manifest(config: &SlipwayConfig, network: &str, out: Option<&Path>) -> Result<()> {
    let mut book = AddressBook::open(&config.book_dir)?;
    let manifest = Manifest::from_book(&mut book, network)?;
    match out {
        Some(path) => manifest.write_json(path)?,
        None => println!("{}", manifest.render_table()),
    }
    Ok(())
}

fn lookup_profile<'a>(
    registry: &'a NetworkProfileRegistry,
    network: &str,
) -> Result<&'a NetworkProfile> {
    registry.lookup(network).with_context(|| {
        format!(
            "Known networks: {}",
            registry.names().collect::<Vec<_>>().join(", ")
        )
    })
}

fn load_plan_for(network: &str, plan_path: &Path) -> Result<DeploymentPlan> {
    let plan = DeploymentPlan::load_from_file(&PathBuf::from(plan_path))
        .context("Failed to load deployment plan")?;
    if plan.network != network {
        anyhow::bail!(
            "Plan targets network '{}' but '{}' was requested",
            plan.network,
            network
        );
    }
    Ok(plan)
}
