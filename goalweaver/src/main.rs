//! Goal-graph orchestrator CLI.
//!
//! Runs a bundled agent team against a fresh goal graph, persisting the run to
//! the state file, and inspects that file read-only afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use goalweaver::agents::{Team, coding, research};
use goalweaver::core::types::GoalStatus;
use goalweaver::exit_codes;
use goalweaver::io::config::{WeaverConfig, load_config, write_config};
use goalweaver::io::state_store::{SharedStateStore, read_state};
use goalweaver::logging;
use goalweaver::orchestrator::{Orchestrator, OrchestratorError, RunOutcome};

#[derive(Parser)]
#[command(
    name = "goalweaver",
    version,
    about = "Goal-graph orchestrator for teams of agents"
)]
struct Cli {
    /// TOML config file; missing means defaults.
    #[arg(long, global = true, default_value = "goalweaver.toml")]
    config: PathBuf,

    /// Override `state_file`.
    #[arg(short = 's', long, global = true)]
    state_file: Option<PathBuf>,

    /// Override `batch_size`.
    #[arg(short = 'b', long, global = true)]
    batch_size: Option<usize>,

    /// Override `stall_threshold`.
    #[arg(long, global = true)]
    stall_threshold: Option<u32>,

    /// Override `batch_timeout_secs`.
    #[arg(long, global = true)]
    batch_timeout_secs: Option<u64>,

    /// Directory the demo agents write their files into.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the research team (same as `research-demo`).
    Demo,
    /// Researcher -> writer -> critic over two seeded topics.
    ResearchDemo,
    /// Architect -> coder/tester -> reviewer over two seeded modules.
    CodingDemo,
    /// List goals from the state file without modifying it.
    Status {
        /// Only show goals with this status.
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },
    /// Write the effective config to `--config`.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StatusFilter {
    Pending,
    Ready,
    InProgress,
    Done,
    Failed,
}

impl From<StatusFilter> for GoalStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => GoalStatus::Pending,
            StatusFilter::Ready => GoalStatus::Ready,
            StatusFilter::InProgress => GoalStatus::InProgress,
            StatusFilter::Done => GoalStatus::Done,
            StatusFilter::Failed => GoalStatus::Failed,
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Demo | Command::ResearchDemo => cmd_run(&cli, research::build_team),
        Command::CodingDemo => cmd_run(&cli, coding::build_team),
        Command::Status { status } => cmd_status(&cli, status.map(GoalStatus::from)),
        Command::InitConfig { force } => cmd_init_config(&cli, *force),
    }
}

/// Config file values with CLI overrides applied, validated.
fn resolve_config(cli: &Cli) -> Result<WeaverConfig> {
    let mut cfg = load_config(&cli.config)?;
    apply_overrides(cli, &mut cfg);
    cfg.validate().context("validate config overrides")?;
    Ok(cfg)
}

fn apply_overrides(cli: &Cli, cfg: &mut WeaverConfig) {
    if let Some(path) = &cli.state_file {
        cfg.state_file = path.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        cfg.batch_size = batch_size;
    }
    if let Some(threshold) = cli.stall_threshold {
        cfg.stall_threshold = threshold;
    }
    if let Some(secs) = cli.batch_timeout_secs {
        cfg.batch_timeout_secs = secs;
    }
}

fn cmd_run(cli: &Cli, build_team: fn(&Path) -> Result<Team>) -> Result<i32> {
    let cfg = resolve_config(cli)?;
    fs::create_dir_all(&cli.workdir)
        .with_context(|| format!("create workdir {}", cli.workdir.display()))?;
    let Team { agents, seeds } = build_team(&cli.workdir).context("build agent team")?;

    let store = Arc::new(SharedStateStore::new(cfg.state_file.clone()));
    store.set("world", json!({ "workdir": cli.workdir.display().to_string() }));

    let mut orchestrator = Orchestrator::new(cfg, agents, store)?;
    for goal in seeds {
        orchestrator.add_goal(goal).context("seed goal")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    match runtime.block_on(orchestrator.run()) {
        Ok(outcome) => {
            print_goals(&orchestrator);
            print_outcome(&outcome);
            Ok(if outcome.all_done() {
                exit_codes::OK
            } else {
                exit_codes::FAILED_GOALS
            })
        }
        Err(err @ OrchestratorError::Persist { .. }) => {
            eprintln!("{:#}", anyhow::Error::from(err));
            print_goals(&orchestrator);
            Ok(exit_codes::PERSIST_FAULT)
        }
        Err(err) => Err(err.into()),
    }
}

fn print_goals(orchestrator: &Orchestrator) {
    for goal in orchestrator.graph().goals() {
        println!("{:<11} {}  {}", goal.status.as_str(), goal.id, goal.title);
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!(
        "converged after {} iterations: {} done, {} failed{}",
        outcome.iterations,
        outcome.done.len(),
        outcome.failed.len(),
        if outcome.stalled { " (stalled)" } else { "" }
    );
}

fn cmd_status(cli: &Cli, filter: Option<GoalStatus>) -> Result<i32> {
    let cfg = resolve_config(cli)?;
    let state = read_state(&cfg.state_file)
        .with_context(|| format!("read state file {}", cfg.state_file.display()))?;

    for goal in state
        .goals
        .iter()
        .filter(|goal| filter.is_none_or(|status| goal.status == status))
    {
        let owner = goal.owner_agent.as_deref().unwrap_or("-");
        println!(
            "{:<11} {}  {}  [{}]",
            goal.status.as_str(),
            goal.id,
            goal.title,
            owner
        );
    }
    println!(
        "goals: {}, logs: {}, artifacts: {}, metrics: {}",
        state.goals.len(),
        state.logs.len(),
        state.artifacts.len(),
        state.metrics.len()
    );
    for (name, value) in &state.metrics {
        println!("  {name} = {value}");
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(cli: &Cli, force: bool) -> Result<i32> {
    if !force && cli.config.exists() {
        bail!(
            "{} already exists; pass --force to overwrite",
            cli.config.display()
        );
    }
    let mut cfg = WeaverConfig::default();
    apply_overrides(cli, &mut cfg);
    write_config(&cli.config, &cfg)?;
    println!("{}", cli.config.display());
    Ok(exit_codes::OK)
}
