//! Test-only helpers: throwaway git repositories and a scripted agent.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, Utc};
use tempfile::TempDir;

use crate::io::atomic::write_json_atomic;
use crate::io::config::TrenchConfig;
use crate::io::session_store::load_record;
use crate::orchestrator::Orchestrator;

/// Stand-in for the agent CLI: echoes its arguments, and keeps running for a
/// while when the task starts with "sleep".
const FAKE_AGENT: &str = r#"#!/bin/sh
echo "task=$2 model=$4"
case "$2" in
  sleep*) sleep 30 ;;
esac
"#;

/// A git repository on `main` with one commit (`README.md`), plus a fake agent
/// script outside the repository.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
    agent: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).context("create repo dir")?;
        let agent = temp.path().join("bin").join("fake-agent");
        fs::create_dir_all(temp.path().join("bin")).context("create bin dir")?;
        fs::write(&agent, FAKE_AGENT).context("write fake agent")?;
        make_executable(&agent)?;

        let repo = Self {
            _temp: temp,
            root,
            agent,
        };
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "Test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.root.join("README.md"), "hello\n").context("write README")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "-q", "-m", "initial"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Default config with the fake agent.
    pub fn config(&self) -> TrenchConfig {
        let mut config = TrenchConfig::default();
        config.agent.command = self.agent.to_string_lossy().into_owned();
        config
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(&self.root, self.config())
    }

    /// Orchestrator with `config`, keeping the fake agent.
    pub fn orchestrator_with(&self, mut config: TrenchConfig) -> Orchestrator {
        config.agent.command = self.agent.to_string_lossy().into_owned();
        Orchestrator::new(&self.root, config)
    }

    /// Run git in the repository root.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_git(&self.root, args)
    }

    /// Write `file` in the checkout at `dir` and commit it there.
    pub fn commit_file_in(&self, dir: &Path, file: &str, contents: &str, message: &str) -> Result<()> {
        fs::write(dir.join(file), contents).with_context(|| format!("write {file}"))?;
        run_git(dir, &["add", file])?;
        run_git(dir, &["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Backdate a session's `last_updated` without going through the store,
    /// which would stamp it with the current time.
    pub fn age_session(&self, orch: &Orchestrator, name: &str, age: Duration) -> Result<()> {
        let paths = orch.session_paths(name);
        let mut record =
            load_record(&paths)?.ok_or_else(|| anyhow!("no record for session '{name}'"))?;
        record.last_updated = Utc::now() - age;
        write_json_atomic(&paths.status_path, &record)
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
