//! enforcer-worker: runs enforcement passes on a fixed interval.
//!
//! Subcommands cover the operator chores around the loop: one-off passes,
//! feeding submissions from a JSON-lines file, validating policy documents,
//! granting hall passes and scaffolding a new policy.
//!
//! Platform calls go to the recording dry-run platform.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use postwarden_core::{Config, PolicySettings};
use postwarden_rules::arbiter::grant_hall_passes;
use postwarden_rules::loader::LoadStatus;
use postwarden_rules::{
    DryRunPlatform, EnforcementEngine, NewSubmission, PassScheduler, PolicyDocument, PolicyLoader,
};
use postwarden_storage::open_ledger;

// ── CLI ─────────────────────────────────────────────────────────────

/// PostWarden enforcement worker.
#[derive(Parser, Debug)]
#[command(name = "enforcer-worker", version, about)]
struct Cli {
    /// Directory of community policy documents.
    #[arg(long, global = true, env = "POLICY_DIR")]
    policy_dir: Option<PathBuf>,

    /// Directory holding the ledger snapshot.
    #[arg(long, global = true, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run passes until interrupted.
    Run {
        /// Stop after this many passes.
        #[arg(long)]
        max_passes: Option<usize>,
    },
    /// Run a single pass and print its report.
    Once,
    /// Record submissions from a JSON-lines file.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Load every policy document and report problems.
    CheckPolicies,
    /// Give an author extra hall passes in a community.
    GrantHallPass {
        #[arg(long)]
        community: String,
        #[arg(long)]
        author: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Write a policy document with default settings.
    InitPolicy {
        #[arg(long)]
        community: String,
        /// Overwrite an existing document.
        #[arg(long)]
        force: bool,
    },
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    postwarden_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(dir) = cli.policy_dir {
        config.policy.dir = dir;
    }
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    config.log_summary();

    match cli.command {
        Command::Run { max_passes } => run(&config, max_passes).await,
        Command::Once => once(&config).await,
        Command::Ingest { file } => ingest(&config, &file).await,
        Command::CheckPolicies => check_policies(&config),
        Command::GrantHallPass {
            community,
            author,
            count,
        } => {
            let ledger = open_ledger(&config.storage)?;
            let state = grant_hall_passes(&ledger, &community, &author, count, Utc::now()).await?;
            info!(community = %state.community, author = %state.author, hall_passes = state.hall_pass, "hall passes granted");
            Ok(())
        }
        Command::InitPolicy { community, force } => init_policy(&config, &community, force),
    }
}

/// Engine over the configured ledger, with documents loaded.
fn build_engine(config: &Config) -> anyhow::Result<(EnforcementEngine, PolicyLoader)> {
    let ledger = open_ledger(&config.storage)
        .with_context(|| format!("opening ledger at {}", config.storage.ledger_path().display()))?;
    warn!("using the dry-run platform: no changes reach any community");
    let mut engine = EnforcementEngine::from_config(Arc::new(DryRunPlatform::new()), Arc::new(ledger), config);

    let loader = PolicyLoader::new(config.policy.dir.clone());
    let results = loader.load_all()?;
    for result in results.iter().filter(|r| r.is_failed()) {
        warn!(path = %result.path.display(), status = ?result.status, "policy document not loaded");
    }
    engine.set_policy_documents(loader.enabled_settings());
    Ok((engine, loader))
}

async fn run(config: &Config, max_passes: Option<usize>) -> anyhow::Result<()> {
    let (engine, loader) = build_engine(config)?;
    let mut scheduler = PassScheduler::new(engine, config.worker.interval).with_loader(loader);
    if let Some(max) = max_passes {
        scheduler = scheduler.with_max_passes(max);
    }

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing current pass");
                shutdown.notify_one();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });

    info!("enforcer-worker starting");
    scheduler.run().await;
    info!("enforcer-worker exited cleanly");
    Ok(())
}

async fn once(config: &Config) -> anyhow::Result<()> {
    let (mut engine, _loader) = build_engine(config)?;
    let report = engine.run_pass().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn ingest(config: &Config, file: &PathBuf) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let items = NewSubmission::parse_lines(&input).with_context(|| format!("parsing {}", file.display()))?;
    let (mut engine, _loader) = build_engine(config)?;
    let report = engine.ingest(items, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check_policies(config: &Config) -> anyhow::Result<()> {
    let loader = PolicyLoader::new(config.policy.dir.clone());
    let results = loader.load_all()?;
    let mut failed = 0;
    for result in &results {
        match &result.status {
            LoadStatus::Loaded { community } => println!("ok      {} ({community})", result.path.display()),
            LoadStatus::Skipped { reason } => println!("skipped {} ({reason})", result.path.display()),
            LoadStatus::Failed { error } => {
                failed += 1;
                println!("FAILED  {}: {error}", result.path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} policy documents failed to load", results.len());
    }
    Ok(())
}

fn init_policy(config: &Config, community: &str, force: bool) -> anyhow::Result<()> {
    let loader = PolicyLoader::new(config.policy.dir.clone());
    loader.load_all()?;
    if loader.get(community).is_some() && !force {
        bail!("a policy for {community} already exists (use --force to replace it)");
    }
    let path = loader.write_document(&PolicyDocument::new(community, PolicySettings::default()))?;
    info!(path = %path.display(), "policy document written");
    Ok(())
}
