//! Git adapter for the orchestrator.
//!
//! Every failure carries git's own stderr verbatim: it is usually the only
//! actionable detail (conflicting paths, locked worktrees, missing refs).

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of `git merge`, keeping the tool's full output on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Merged,
    Failed { detail: String },
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!(
                "detached HEAD in {} (pass an explicit base)",
                self.workdir.display()
            ));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Absolute path of the top of the working tree.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Uncommitted changes, ignoring entries under any of the given prefixes.
    pub fn changes_except_prefixes(&self, ignored_prefixes: &[&str]) -> Result<Vec<StatusEntry>> {
        Ok(self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| {
                !ignored_prefixes
                    .iter()
                    .any(|prefix| entry.path.starts_with(prefix))
            })
            .collect())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create `branch` at `base` without checking it out.
    #[instrument(skip_all, fields(branch = %branch, base = %base))]
    pub fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        debug!(branch, base, "creating branch");
        self.run_checked(&["branch", branch, base])?;
        Ok(())
    }

    /// Delete a local branch; `force` allows deleting unmerged work.
    #[instrument(skip_all, fields(branch = %branch, force = force))]
    pub fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        debug!(branch, force, "deleting branch");
        self.run_checked(&["branch", flag, branch])?;
        Ok(())
    }

    /// Add a linked worktree at `path` checked out to existing `branch`.
    #[instrument(skip_all, fields(path = %path.display(), branch = %branch))]
    pub fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        let path_arg = path.to_string_lossy().into_owned();
        debug!("adding worktree");
        self.run_checked(&["worktree", "add", path_arg.as_str(), branch])?;
        Ok(())
    }

    /// Remove the linked worktree at `path`.
    #[instrument(skip_all, fields(path = %path.display(), force = force))]
    pub fn worktree_remove(&self, path: &Path, force: bool) -> Result<()> {
        let path_arg = path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_arg.as_str());
        debug!("removing worktree");
        self.run_checked(&args)?;
        Ok(())
    }

    /// Forget worktrees whose directories no longer exist.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// `git merge --no-ff -m <message> <branch>` into the current branch.
    ///
    /// A non-zero exit is reported as [`MergeResult::Failed`] with stdout and
    /// stderr combined (git prints CONFLICT lines on stdout).
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn merge_no_ff(&self, branch: &str, message: &str) -> Result<MergeResult> {
        let output = self.run(&["merge", "--no-ff", "-m", message, branch])?;
        if output.status.success() {
            debug!(branch, "merge succeeded");
            return Ok(MergeResult::Merged);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = [stdout.trim(), stderr.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        warn!(branch, "merge failed");
        Ok(MergeResult::Failed { detail })
    }

    /// Abandon an in-progress merge. Fails harmlessly when none is in progress.
    pub fn merge_abort(&self) -> Result<()> {
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn ignored_prefixes_are_filtered() {
        let repo = TestRepo::new().expect("repo");
        std::fs::create_dir_all(repo.path().join(".trench")).expect("mkdir");
        std::fs::write(repo.path().join(".trench/x"), "x").expect("write");
        std::fs::write(repo.path().join("real.txt"), "x").expect("write");

        let git = Git::new(repo.path());
        let changes = git.changes_except_prefixes(&[".trench/"]).expect("status");
        let paths: Vec<_> = changes.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["real.txt"]);
    }

    #[test]
    fn branch_and_worktree_lifecycle() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        git.create_branch("topic", "main").expect("branch");
        assert!(git.branch_exists("topic").expect("exists"));

        let wt = repo.path().join("wt");
        git.worktree_add(&wt, "topic").expect("worktree add");
        assert!(wt.join("README.md").is_file());
        assert_eq!(Git::new(&wt).current_branch().expect("branch"), "topic");

        git.worktree_remove(&wt, false).expect("worktree remove");
        assert!(!wt.exists());
        git.delete_branch("topic", false).expect("delete");
        assert!(!git.branch_exists("topic").expect("exists"));
    }

    #[test]
    fn failures_surface_git_stderr() {
        let repo = TestRepo::new().expect("repo");
        let err = Git::new(repo.path())
            .create_branch("x", "no-such-base")
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("git branch x no-such-base failed"), "{msg}");
        assert!(msg.contains("no-such-base"), "{msg}");
    }

    #[test]
    fn conflicting_merge_reports_detail() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        git.create_branch("topic", "main").expect("branch");
        let wt = repo.path().join("wt");
        git.worktree_add(&wt, "topic").expect("worktree");
        repo.commit_file_in(&wt, "README.md", "topic side\n", "topic edit")
            .expect("commit topic");
        repo.commit_file_in(repo.path(), "README.md", "main side\n", "main edit")
            .expect("commit main");

        let result = git.merge_no_ff("topic", "merge topic").expect("merge");
        let MergeResult::Failed { detail } = result else {
            panic!("expected conflict");
        };
        assert!(detail.contains("CONFLICT"), "{detail}");
        git.merge_abort().expect("abort");
        let status = git.status_porcelain().expect("status");
        assert!(status.iter().all(|entry| entry.path != "README.md"));
    }
}
