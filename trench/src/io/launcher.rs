//! Detached launch of the supervised agent process.
//!
//! Launching transfers ownership: the child gets its own process group, stdin
//! from /dev/null and its combined output in the session log. Afterwards it is
//! only observed through the process registry.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::io::process::own_process_group;

/// Parameters for one agent launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Agent executable (resolved through `PATH` when not a path).
    pub program: String,
    pub task: String,
    pub model: String,
    pub workdir: PathBuf,
    /// Receives stdout and stderr, appended.
    pub log_path: PathBuf,
}

/// Start `<program> -p <task> --model <model>` in the background and return its PID.
#[instrument(skip_all, fields(program = %request.program, model = %request.model))]
pub fn launch_detached(request: &LaunchRequest) -> Result<u32> {
    if let Some(parent) = request.log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&request.log_path)
        .with_context(|| format!("open session log {}", request.log_path.display()))?;
    let log_err = log.try_clone().context("duplicate session log handle")?;

    let mut cmd = Command::new(&request.program);
    cmd.arg("-p")
        .arg(&request.task)
        .arg("--model")
        .arg(&request.model)
        .current_dir(&request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    own_process_group(&mut cmd);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn agent '{}'", request.program))?;
    let pid = child.id();
    if pid == 0 {
        return Err(anyhow!("agent started without a pid"));
    }
    info!(pid, workdir = %request.workdir.display(), "agent launched");

    // Reaps only while this process is running (long-lived library callers, tests).
    // A CLI invocation exits right away and init adopts and reaps the child.
    thread::spawn(move || {
        let status = child.wait();
        debug!(pid, status = ?status, "agent exited");
    });
    Ok(pid)
}
