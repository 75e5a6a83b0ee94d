use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use tributary_config::Settings;
use tributary_state::State;
use tributary_store::{
  LogFilter, LogLevel, OrchestrationClient, Run, RunFilter, RunKind, SqliteAuthority,
};

/// Tributary - inspect flow and task run history
#[derive(Parser)]
#[command(name = "tributary")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tributary)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Inspect recorded runs
  Runs {
    #[command(subcommand)]
    command: RunsCommand,
  },

  /// Print the effective engine settings as JSON
  Settings,
}

#[derive(Subcommand)]
enum RunsCommand {
  /// List runs, oldest first
  List {
    #[arg(long, value_enum)]
    kind: Option<KindArg>,

    /// Only runs of this flow or task
    #[arg(long)]
    name: Option<String>,
  },

  /// Show a run and its state history
  Show {
    run_id: Uuid,
  },

  /// Print the logs a run emitted
  Logs {
    run_id: Uuid,

    /// Hide records below this level
    #[arg(long, value_enum, default_value = "debug")]
    level: LevelArg,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
  Debug,
  Info,
  Warning,
  Error,
  Critical,
}

impl From<LevelArg> for LogLevel {
  fn from(level: LevelArg) -> Self {
    match level {
      LevelArg::Debug => LogLevel::Debug,
      LevelArg::Info => LogLevel::Info,
      LevelArg::Warning => LogLevel::Warning,
      LevelArg::Error => LogLevel::Error,
      LevelArg::Critical => LogLevel::Critical,
    }
  }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
  Flow,
  Task,
}

impl From<KindArg> for RunKind {
  fn from(kind: KindArg) -> Self {
    match kind {
      KindArg::Flow => RunKind::Flow,
      KindArg::Task => RunKind::Task,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tributary"),
  };

  match cli.command {
    Some(Commands::Runs { command }) => {
      let authority = open_authority(&data_dir).await?;
      match command {
        RunsCommand::List { kind, name } => {
          let mut filter = RunFilter::default();
          if let Some(kind) = kind {
            filter = filter.kind(kind.into());
          }
          if let Some(name) = name {
            filter = filter.definition_name(name);
          }
          list_runs(&authority, &filter).await?;
        }
        RunsCommand::Show { run_id } => show_run(&authority, run_id).await?,
        RunsCommand::Logs { run_id, level } => show_logs(&authority, run_id, level.into()).await?,
      }
    }
    Some(Commands::Settings) => {
      let settings = Settings::from_env().context("failed to load settings")?;
      println!("{}", serde_json::to_string_pretty(&settings)?);
    }
    None => {
      println!("tributary - use --help to see available commands");
    }
  }

  Ok(())
}

async fn open_authority(data_dir: &Path) -> Result<SqliteAuthority> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = data_dir.join("tributary.db");
  debug!(path = %path.display(), "opening_run_database");
  SqliteAuthority::open(&path)
    .await
    .with_context(|| format!("failed to open run database: {}", path.display()))
}

async fn list_runs(authority: &SqliteAuthority, filter: &RunFilter) -> Result<()> {
  let runs = authority
    .list_runs(filter)
    .await
    .context("failed to list runs")?;

  if runs.is_empty() {
    eprintln!("No runs recorded");
    return Ok(());
  }

  for run in runs {
    println!(
      "{}  {:<4}  {:<12}  {:>3}  {}",
      run.id,
      run.kind.to_string(),
      run.state.name,
      run.run_count,
      run.name
    );
  }
  Ok(())
}

async fn show_run(authority: &SqliteAuthority, run_id: Uuid) -> Result<()> {
  let run = authority
    .read_run(run_id)
    .await
    .with_context(|| format!("failed to read run {run_id}"))?;
  let history = authority
    .read_states(run_id)
    .await
    .with_context(|| format!("failed to read state history of {run_id}"))?;

  print_run(&run);
  println!();
  println!("History:");
  for state in &history {
    print_state(state);
  }
  Ok(())
}

async fn show_logs(authority: &SqliteAuthority, run_id: Uuid, level: LogLevel) -> Result<()> {
  let run = authority
    .read_run(run_id)
    .await
    .with_context(|| format!("failed to read run {run_id}"))?;
  let filter = LogFilter::default().run_id(run.id, run.kind).min_level(level);
  let logs = authority
    .read_logs(&filter)
    .await
    .with_context(|| format!("failed to read logs of {run_id}"))?;

  if logs.is_empty() {
    eprintln!("No logs recorded");
    return Ok(());
  }

  for log in logs {
    let timestamp = log.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
    println!("{timestamp}  {:<8}  {}", log.level.to_string(), log.message);
  }
  Ok(())
}

fn print_run(run: &Run) {
  println!("Run:        {} ({})", run.name, run.id);
  println!("Kind:       {}", run.kind);
  println!("Definition: {}", run.definition_name);
  if let Some(version) = &run.version {
    println!("Version:    {version}");
  }
  println!("State:      {}", run.state.name);
  println!("Run count:  {}", run.run_count);
  if !run.tags.is_empty() {
    let tags: Vec<&str> = run.tags.iter().map(String::as_str).collect();
    println!("Tags:       {}", tags.join(", "));
  }
  if let Some(flow_run_id) = run.flow_run_id {
    println!("Flow run:   {flow_run_id}");
  }
  if let Some(parent) = run.parent_task_run_id {
    println!("Parent:     {parent}");
  }
  println!("Parameters: {}", run.parameters.describe());
  for (name, inputs) in &run.task_inputs {
    let ids: Vec<String> = inputs.iter().map(|input| input.id.to_string()).collect();
    println!("Input:      {name} <- {}", ids.join(", "));
  }
}

fn print_state(state: &State) {
  let timestamp = state.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
  match &state.message {
    Some(message) => println!("  {timestamp}  {:<12}  {message}", state.name),
    None => println!("  {timestamp}  {}", state.name),
  }
}
