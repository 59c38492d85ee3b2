//! Isolated, concurrent agent sessions over one git repository.
//!
//! Every command operates on the repository containing the working directory
//! (or `--repo`). State lives under `.trench/` and `.trenches/` in that
//! repository; see the library docs for the layout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use trench::core::events::{SessionView, reduce_session};
use trench::error::{TrenchError, find_trench_error};
use trench::exit_codes;
use trench::io::git::Git;
use trench::logs::{follow, tail_lines};
use trench::orchestrator::{CleanupOutcome, Orchestrator, SessionReport};

const FOLLOW_POLL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "trench",
    version,
    about = "Isolated, verified agent sessions in git worktrees"
)]
struct Cli {
    /// Repository to operate on (default: the one containing the working directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a session branch and worktree, optionally launching the agent.
    Spawn {
        name: String,
        /// Branch or commit to start from (default: current branch).
        #[arg(long)]
        base: Option<String>,
        /// Task for the agent; launches it when given.
        #[arg(long)]
        task: Option<String>,
        /// Model tier (default: chosen from the task's complexity).
        #[arg(long, requires = "task")]
        model: Option<String>,
    },
    /// Show one session or all of them.
    Status {
        name: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run verification in a session's workspace.
    Test {
        name: String,
        /// Shell command (default: `verify.command` from config).
        #[arg(long = "cmd")]
        command: Option<String>,
    },
    /// Merge a verified session into the current branch.
    Merge {
        name: String,
        /// Keep the session branch after merging.
        #[arg(long)]
        no_delete: bool,
    },
    /// Discard a session and its workspace.
    Abort {
        name: String,
        /// Discard uncommitted changes in the workspace.
        #[arg(short, long)]
        force: bool,
    },
    /// Abort sessions that have been idle for too long.
    Prune {
        /// Idle threshold in days (default: `stale_days` from config).
        #[arg(long)]
        days: Option<u32>,
        /// Actually abort; without it only lists candidates.
        #[arg(long)]
        execute: bool,
    },
    /// Daily housekeeping: dead processes, stale sessions, worktree metadata.
    Cleanup {
        /// Run even if cleanup already ran today.
        #[arg(short, long)]
        force: bool,
    },
    /// Show the agent log of a session.
    Logs {
        name: String,
        #[arg(long, default_value_t = 50)]
        lines: usize,
        /// Keep printing new output until the agent exits.
        #[arg(short, long)]
        follow: bool,
    },
    /// Show recent session events and the status they add up to.
    History {
        name: String,
        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
}

fn main() {
    trench::logging::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match find_trench_error(err) {
        Some(TrenchError::LockBusy { .. }) => exit_codes::BUSY,
        Some(TrenchError::VerificationFailed { .. } | TrenchError::MergeConflict { .. }) => {
            exit_codes::VERIFY_FAILED
        }
        Some(err) if err.is_state_error() => exit_codes::STATE,
        _ => exit_codes::FAILED,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = resolve_root(cli.repo.as_deref())?;
    let orch = Orchestrator::open(&root)?;
    match cli.command {
        Command::Spawn {
            name,
            base,
            task,
            model,
        } => cmd_spawn(&orch, &name, base.as_deref(), task.as_deref(), model.as_deref()),
        Command::Status { name, json } => cmd_status(&orch, name.as_deref(), json),
        Command::Test { name, command } => cmd_test(&orch, &name, command.as_deref()),
        Command::Merge { name, no_delete } => cmd_merge(&orch, &name, !no_delete),
        Command::Abort { name, force } => cmd_abort(&orch, &name, force),
        Command::Prune { days, execute } => cmd_prune(&orch, days, execute),
        Command::Cleanup { force } => cmd_cleanup(&orch, force),
        Command::Logs {
            name,
            lines,
            follow,
        } => cmd_logs(&orch, &name, lines, follow),
        Command::History { name, lines } => cmd_history(&orch, &name, lines),
    }
}

fn resolve_root(repo: Option<&Path>) -> Result<PathBuf> {
    let start = match repo {
        Some(repo) => repo.to_path_buf(),
        None => std::env::current_dir().context("read current directory")?,
    };
    Git::new(&start)
        .toplevel()
        .with_context(|| format!("{} is not inside a git repository", start.display()))
}

fn cmd_spawn(
    orch: &Orchestrator,
    name: &str,
    base: Option<&str>,
    task: Option<&str>,
    model: Option<&str>,
) -> Result<()> {
    let record = orch.spawn(name, base)?;
    println!(
        "spawned {} on {} at {}",
        record.name, record.branch, record.workspace_path
    );
    if let Some(task) = task {
        let launched = orch.launch_session(name, task, model)?;
        println!(
            "launched agent pid {} (model {}, {} task)",
            launched.pid, launched.model, launched.complexity
        );
    }
    Ok(())
}

fn cmd_status(orch: &Orchestrator, name: Option<&str>, json: bool) -> Result<()> {
    let reports = orch.status(name)?;
    if json {
        let out = serde_json::to_string_pretty(&reports).context("serialize status")?;
        println!("{out}");
        return Ok(());
    }
    if reports.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    println!(
        "{:<24} {:<9} {:<32} {:<14} UPDATED",
        "NAME", "STATUS", "BRANCH", "AGENT"
    );
    for report in &reports {
        println!(
            "{:<24} {:<9} {:<32} {:<14} {}",
            report.record.name,
            report.record.status.as_str(),
            report.record.branch,
            agent_label(report),
            report.record.last_updated.format("%Y-%m-%d %H:%M")
        );
    }
    if let [report] = reports.as_slice()
        && !report.record.error.is_empty()
    {
        println!("\nerror: {}", report.record.error);
    }
    Ok(())
}

fn agent_label(report: &SessionReport) -> String {
    match report.record.pid {
        Some(pid) if report.process_alive => format!("{pid} (alive)"),
        Some(pid) => format!("{pid} (exited)"),
        None => "-".to_string(),
    }
}

fn cmd_test(orch: &Orchestrator, name: &str, command: Option<&str>) -> Result<()> {
    let outcome = orch.run_verification(name, command)?;
    print!("{}", outcome.record.test_output);
    if !outcome.record.test_output.is_empty() && !outcome.record.test_output.ends_with('\n') {
        println!();
    }
    if !outcome.passed {
        return Err(TrenchError::VerificationFailed {
            name: name.to_string(),
            summary: outcome.record.error,
        }
        .into());
    }
    println!("{name}: {}", outcome.record.status);
    Ok(())
}

fn cmd_merge(orch: &Orchestrator, name: &str, delete_branch: bool) -> Result<()> {
    let outcome = orch.merge(name, delete_branch)?;
    println!("merged {} into the current branch", outcome.record.branch);
    if delete_branch && !outcome.branch_deleted {
        println!("branch {} was kept (see log for details)", outcome.record.branch);
    }
    Ok(())
}

fn cmd_abort(orch: &Orchestrator, name: &str, force: bool) -> Result<()> {
    let outcome = orch.abort(name, force)?;
    if outcome.terminated_process {
        println!("terminated agent of {name}");
    }
    println!("aborted {name}");
    Ok(())
}

fn cmd_prune(orch: &Orchestrator, days: Option<u32>, execute: bool) -> Result<()> {
    let days = days.unwrap_or(orch.config().stale_days);
    let report = orch.prune_stale(chrono::Duration::days(i64::from(days)), !execute)?;
    if report.candidates.is_empty() {
        println!("no sessions idle for {days} days or more");
        return Ok(());
    }
    for candidate in &report.candidates {
        let status = candidate
            .status
            .map_or("unreadable", |status| status.as_str());
        let verb = if execute { "pruned" } else { "would prune" };
        println!(
            "{verb} {} ({status}, last updated {})",
            candidate.name,
            candidate.last_updated.format("%Y-%m-%d")
        );
    }
    for (name, err) in &report.failures {
        eprintln!("failed to prune {name}: {err}");
    }
    if !execute {
        println!("dry run; pass --execute to abort these sessions");
    }
    if !report.failures.is_empty() {
        anyhow::bail!("{} session(s) could not be pruned", report.failures.len());
    }
    Ok(())
}

fn cmd_cleanup(orch: &Orchestrator, force: bool) -> Result<()> {
    match orch.cleanup(force)? {
        CleanupOutcome::AlreadyCleaned { date } => {
            println!("already cleaned on {date} (use --force to run again)");
        }
        CleanupOutcome::InProgress => println!("cleanup already in progress elsewhere"),
        CleanupOutcome::Completed {
            dead_processes,
            pruned,
        } => {
            println!(
                "removed {} dead process record(s), pruned {} stale session(s)",
                dead_processes.len(),
                pruned.pruned().count()
            );
            for (name, err) in &pruned.failures {
                eprintln!("failed to prune {name}: {err}");
            }
        }
    }
    Ok(())
}

fn cmd_logs(orch: &Orchestrator, name: &str, lines: usize, follow_output: bool) -> Result<()> {
    let report = orch.status(Some(name))?;
    let log_path = orch.session_paths(name).log_path;
    for line in tail_lines(&log_path, lines)? {
        println!("{line}");
    }
    let alive = report.first().is_some_and(|report| report.process_alive);
    if follow_output && alive {
        let offset = std::fs::metadata(&log_path).map_or(0, |meta| meta.len());
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        follow(&log_path, offset, orch.tracker(), name, FOLLOW_POLL, &mut out)?;
        out.flush().context("flush stdout")?;
    }
    Ok(())
}

fn cmd_history(orch: &Orchestrator, name: &str, lines: usize) -> Result<()> {
    orch.status(Some(name))?;
    let log = orch.event_log(name);
    for event in log.tail(lines)? {
        println!(
            "{:>4} {} {:<22} {}",
            event.seq,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.payload
        );
    }
    let view = log.compute_state(reduce_session, SessionView::default())?;
    let status = view.status.map_or("unknown", |status| status.as_str());
    println!(
        "\n{} events, {} verification(s), derived status: {status}",
        view.events_seen, view.verifications
    );
    if let Some(error) = view.last_error {
        println!("last error: {error}");
    }
    Ok(())
}
