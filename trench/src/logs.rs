//! Reading a session's agent log (`trench logs`).

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::process_tracker::ProcessTracker;

/// Last `n` lines of the file at `path`; empty when it does not exist yet.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let text = String::from_utf8_lossy(&contents);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|line| (*line).to_string()).collect())
}

/// Copy output appended to `path` after byte `offset` into `out` until the
/// process tracked as `name` is no longer alive. Returns the final offset.
pub fn follow<W: Write>(
    path: &Path,
    mut offset: u64,
    tracker: &ProcessTracker,
    name: &str,
    poll_interval: Duration,
    out: &mut W,
) -> Result<u64> {
    loop {
        // Check liveness before draining so output written just before exit is not lost.
        let alive = tracker.is_alive(name)?;
        offset = copy_from(path, offset, out)?;
        if !alive {
            debug!(name, offset, "process gone, stopping follow");
            return Ok(offset);
        }
        thread::sleep(poll_interval);
    }
}

fn copy_from<W: Write>(path: &Path, offset: u64, out: &mut W) -> Result<u64> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(offset),
        Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
    };
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    // Truncated or replaced: start over.
    let start = if len < offset { 0 } else { offset };
    file.seek(SeekFrom::Start(start))
        .with_context(|| format!("seek {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("read {}", path.display()))?;
    out.write_all(&buf).context("write log output")?;
    out.flush().context("flush log output")?;
    Ok(start + buf.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_last_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.log");
        fs::write(&path, "a\nb\nc\nd\n").expect("write");
        assert_eq!(tail_lines(&path, 2).expect("tail"), vec!["c", "d"]);
        assert_eq!(tail_lines(&path, 10).expect("tail").len(), 4);
        assert!(tail_lines(&temp.path().join("none"), 5).expect("tail").is_empty());
    }

    #[test]
    fn follow_stops_when_process_is_not_tracked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.log");
        fs::write(&path, "old\nnew\n").expect("write");
        let tracker = ProcessTracker::new(temp.path().join("p.json"), temp.path().join("p.lock"));

        let mut out = Vec::new();
        let offset = follow(&path, 4, &tracker, "x", Duration::from_millis(10), &mut out)
            .expect("follow");
        assert_eq!(String::from_utf8(out).expect("utf8"), "new\n");
        assert_eq!(offset, 8);
    }

    #[test]
    fn follow_streams_until_the_writer_exits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.log");
        let tracker = ProcessTracker::new(temp.path().join("p.json"), temp.path().join("p.lock"));

        let script = format!(
            "for i in 1 2 3; do echo line$i >> '{}'; sleep 0.1; done",
            path.display()
        );
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .spawn()
            .expect("spawn writer");
        tracker.register(child.id(), "writer").expect("register");
        let reaper = thread::spawn(move || child.wait());

        let mut out = Vec::new();
        follow(&path, 0, &tracker, "writer", Duration::from_millis(20), &mut out)
            .expect("follow");
        reaper.join().expect("reaper").expect("wait");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "line1\nline2\nline3\n");
    }
}
