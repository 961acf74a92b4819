//! Subagent CLI - run delegated tasks from the command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use subagent_core::{RunId, RunRecord, RunStatus, TaskSpec};
use subagent_launcher::{LauncherExecutor, DEFAULT_LAUNCHER};
use subagent_orchestrator::{load_snapshots, Orchestrator, OrchestratorConfig, Program, RunRequest};

/// Subagent - orchestrate AI tasks in isolated subprocesses
#[derive(Parser)]
#[command(name = "subagent")]
#[command(about = "Run delegated tasks as single runs, parallel batches, chains or programs", long_about = None)]
struct Cli {
    /// Task launcher executable
    #[arg(long, default_value = DEFAULT_LAUNCHER)]
    launcher: PathBuf,

    /// Directory receiving one artifacts directory per run
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Keep runs in memory only (no events.jsonl, artifacts or run.json)
    #[arg(long)]
    no_persist: bool,

    /// Parallel tasks allowed to run at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Largest accepted parallel batch
    #[arg(long)]
    max_tasks: Option<usize>,

    /// Seconds between SIGTERM and SIGKILL when a task is cancelled
    #[arg(long, default_value = "5")]
    grace_secs: u64,

    /// Print the final run record as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task
    Run {
        /// Agent name
        #[arg(short, long)]
        agent: String,

        /// Model to run the task with
        #[arg(short, long)]
        model: String,

        /// Task description
        task: String,

        /// System prompt for the agent
        #[arg(long)]
        system_prompt: Option<String>,

        /// Tool allow-list (comma separated)
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,

        /// Working directory of the task
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Ask the launcher to write its session to this file
        #[arg(long)]
        session: Option<PathBuf>,
    },

    /// Run a JSON array of tasks in parallel
    Parallel {
        /// File containing the task list
        file: PathBuf,
    },

    /// Run a JSON array of tasks as a chain; `{previous}` receives the prior output
    Chain {
        /// File containing the steps
        file: PathBuf,
    },

    /// Execute an orchestration program
    Program {
        /// Program file
        file: PathBuf,
    },

    /// List persisted runs
    History {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a persisted run
    Show {
        /// Run ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout only carries results
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("subagent=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = OrchestratorConfig {
        persist: !cli.no_persist,
        ..Default::default()
    };
    if let Some(dir) = &cli.artifacts_dir {
        config.artifacts_root = dir.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(max_tasks) = cli.max_tasks {
        config.max_parallel_tasks = max_tasks;
    }

    let executor = LauncherExecutor::new(&cli.launcher)
        .with_grace_period(Duration::from_secs(cli.grace_secs));
    let orchestrator = Orchestrator::new(config, Arc::new(executor));

    let request = match cli.command {
        Commands::Run {
            agent,
            model,
            task,
            system_prompt,
            tools,
            cwd,
            session,
        } => {
            let mut spec = TaskSpec::new(agent, task, model).with_tools(tools);
            if let Some(prompt) = system_prompt {
                spec = spec.with_system_prompt(prompt);
            }
            if let Some(cwd) = cwd {
                spec = spec.with_cwd(cwd);
            }
            if let Some(session) = session {
                spec = spec.with_session_path(session);
            }
            RunRequest::Single(spec)
        }
        Commands::Parallel { file } => RunRequest::Parallel(read_tasks(&file)?),
        Commands::Chain { file } => RunRequest::Chain(read_tasks(&file)?),
        Commands::Program { file } => {
            RunRequest::Program(Program::from_json(&std::fs::read_to_string(&file)?)?)
        }
        Commands::History { limit } => {
            list_runs(&orchestrator.config().artifacts_root, limit);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Show { id } => {
            orchestrator.load_history();
            let Some(record) = orchestrator.get(&RunId::new(id.clone())) else {
                eprintln!("Run not found: {id}");
                return Ok(ExitCode::FAILURE);
            };
            print_record(&record, cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let run_id = orchestrator.submit(request)?;
    info!(%run_id, "Run started");

    let token = orchestrator.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running tasks");
            token.cancel();
        }
    });

    let record = orchestrator.wait(&run_id).await?;
    print_record(&record, cli.json)?;

    Ok(if record.status == RunStatus::Done {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_tasks(path: &Path) -> Result<Vec<TaskSpec>, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn list_runs(root: &Path, limit: usize) {
    let mut runs = load_snapshots(root);
    // Newest first
    runs.reverse();
    runs.truncate(limit);

    if runs.is_empty() {
        println!("No runs found in {}", root.display());
        return;
    }

    println!("Runs ({}):", runs.len());
    println!("{:<18}  {:<10}  {:<20}  {:<6}  TASK", "ID", "STATUS", "STARTED", "TASKS");
    println!("{}", "-".repeat(80));

    for run in runs {
        println!(
            "{:<18}  {:<10}  {:<20}  {:<6}  {}",
            run.run_id.to_string(),
            run.status.as_str(),
            format_timestamp(run.started_at),
            run.results.len(),
            truncate(&run.task, 40)
        );
    }
}

fn print_record(record: &RunRecord, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!("Run: {}", record.run_id);
    println!("  Status:    {}", record.status);
    println!("  Task:      {}", truncate(&record.task, 60));
    println!("  Started:   {}", format_timestamp(record.started_at));
    if let Some(completed) = record.completed_at {
        let elapsed = completed - record.started_at;
        println!(
            "  Completed: {} ({:.1}s)",
            format_timestamp(completed),
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }
    if let Some(dir) = &record.observability.artifacts_dir {
        println!("  Artifacts: {}", dir.display());
    }
    if let Some(error) = &record.error {
        println!("  Error:     {error}");
    }

    let usage = record.total_usage();
    println!(
        "  Usage:     {} in / {} out tokens, {} turns, ${:.4}",
        usage.input, usage.output, usage.turns, usage.cost
    );

    for (index, result) in record.results.iter().enumerate() {
        println!();
        let label = match result.step {
            Some(step) => format!("step {step}"),
            None => format!("#{}", index + 1),
        };
        println!(
            "[{label}] {} ({}) exit={}",
            result.agent, result.model, result.exit_code
        );
        if result.is_failure() {
            println!("  Error: {}", result.failure_message());
        }
        if let Some(session) = &result.session_path {
            println!("  Session: {}", session.display());
        }
        let output = result.final_output();
        if !output.is_empty() {
            println!("{}", "-".repeat(80));
            println!("{output}");
        }
    }

    Ok(())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.replace('\n', " ")
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head.replace('\n', " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "subagent",
            "--no-persist",
            "run",
            "--agent",
            "scout",
            "--model",
            "m1",
            "--tools",
            "read,grep",
            "find the bug",
        ])
        .unwrap();
        assert!(cli.no_persist);
        match cli.command {
            Commands::Run { agent, tools, task, .. } => {
                assert_eq!(agent, "scout");
                assert_eq!(tools, vec!["read", "grep"]);
                assert_eq!(task, "find the bug");
            }
            _ => panic!("expected run"),
        }
    }
}
