//! Consilium Runtime
//!
//! The entry point for the consulting pipeline. Handles CLI args, config
//! loading, run bookkeeping, and graceful cancellation.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use consilium::config::{self, PipelineConfig};
use consilium::pipeline::{PipelineContext, STAGE_PLAN};
use consilium::state::RunStore;

const VERSION: &str = "0.1.0";

/// Consilium -- Consulting Pipeline Runtime
#[derive(Parser, Debug)]
#[command(
    name = "consilium",
    version = VERSION,
    about = "Consilium -- staged consulting pipeline over a guarded KPI store"
)]
struct Cli {
    /// Run the pipeline for a goal
    #[arg(long, value_name = "GOAL")]
    run: Option<String>,

    /// Override the KPI database path for this run
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// List recent runs
    #[arg(long)]
    status: bool,

    /// Show the stored plan and caveats for a run
    #[arg(long, value_name = "RUN_ID")]
    show: Option<String>,

    /// Write a default config file to ~/.consilium/consilium.json
    #[arg(long)]
    init: bool,
}

fn load_or_default_config() -> PipelineConfig {
    config::load_config().unwrap_or_default()
}

// ---- Status Commands --------------------------------------------------------

fn show_status(cfg: &PipelineConfig) -> Result<()> {
    let store = RunStore::open(&config::resolve_path(&cfg.run_db_path))?;
    let runs = store.list_runs(10)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in runs {
        let status = match run.status {
            Some(s) => serde_json::to_string(&s)?,
            None => "\"running\"".to_string(),
        };
        println!("{}  {}  {}  {}", run.id, run.started_at, status, run.goal);
    }
    Ok(())
}

fn show_run(cfg: &PipelineConfig, run_id: &str) -> Result<()> {
    let store = RunStore::open(&config::resolve_path(&cfg.run_db_path))?;
    let Some(record) = store.get_run(run_id)? else {
        eprintln!("No such run: {run_id}");
        std::process::exit(1);
    };

    let plan = store.get_scratch(run_id, STAGE_PLAN)?;
    let output = serde_json::json!({
        "runId": record.id,
        "goal": record.goal,
        "status": record.status,
        "startedAt": record.started_at,
        "finishedAt": record.finished_at,
        "plan": plan,
        "caveats": record.caveats,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ---- Main Run ---------------------------------------------------------------

async fn run_pipeline(cfg: &PipelineConfig, goal: &str) -> Result<()> {
    if cfg.api_key.is_empty() {
        eprintln!("No API key configured. Edit ~/.consilium/consilium.json first.");
        std::process::exit(1);
    }

    let mut store = RunStore::open(&config::resolve_path(&cfg.run_db_path))
        .context("Failed to open run store")?;
    let context = PipelineContext::initialize(cfg)?;

    let run_id = format!("run_{}", uuid::Uuid::new_v4());
    store.insert_run(&run_id, goal, &chrono::Utc::now().to_rfc3339())?;

    // Ctrl+C flips the cancellation flag; the engine stops at the next
    // safe point and the partial run is still persisted.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current step...");
            let _ = cancel_tx.send(true);
        }
    });

    let report = match context.run(goal, cancel_rx).await {
        Ok(report) => report,
        Err(err) => {
            store.fail_run(&run_id, &format!("{err:#}"), &chrono::Utc::now().to_rfc3339())?;
            return Err(err);
        }
    };
    store.finish_run(&run_id, &report, &chrono::Utc::now().to_rfc3339())?;

    let output = serde_json::json!({
        "runId": run_id,
        "status": report.status,
        "plan": report.state.scratch(STAGE_PLAN).or(report.state.final_answer()),
        "caveats": report.caveats,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("consilium=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.init {
        let cfg = PipelineConfig::default();
        config::save_config(&cfg)?;
        println!("Wrote {}", config::get_config_path().display());
        return Ok(());
    }

    let mut cfg = load_or_default_config();
    if let Some(db) = cli.db {
        cfg.kpi_db_path = db;
    }

    if cli.status {
        return show_status(&cfg);
    }
    if let Some(run_id) = cli.show {
        return show_run(&cfg, &run_id);
    }
    if let Some(goal) = cli.run {
        return run_pipeline(&cfg, &goal).await;
    }

    eprintln!("Nothing to do. Try --run \"<goal>\", --status, or --show <run_id>.");
    std::process::exit(2);
}
