//! All-or-nothing file replacement (temp file in the same directory + rename).

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

/// Replace `path` with `contents`.
///
/// Readers observe either the old file or the new one, never a mix. If anything
/// fails the temp file is removed and `path` is left untouched.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = write_temp(path, contents)?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "atomic write");
    Ok(())
}

/// Like [`write_atomic`] but fails if `path` already exists.
pub fn write_atomic_new(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = write_temp(path, contents)?;
    tmp.persist_noclobber(path)
        .map_err(|err| err.error)
        .with_context(|| format!("create {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "atomic create");
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

fn write_temp(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", path.display()))?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn payload(writer: usize, round: usize) -> String {
        let marker = char::from(b'a' + u8::try_from(writer).expect("small writer id"));
        format!("{writer}:{round}:{}\n", marker.to_string().repeat(8192))
    }

    fn is_complete_payload(contents: &str) -> bool {
        let mut parts = contents.splitn(3, ':');
        let (Some(writer), Some(_round), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let Ok(writer) = writer.parse::<usize>() else {
            return false;
        };
        let marker = char::from(b'a' + u8::try_from(writer).expect("small writer id"));
        let body = body.strip_suffix('\n').unwrap_or("");
        body.len() == 8192 && body.chars().all(|c| c == marker)
    }

    #[test]
    fn creates_missing_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a/b/c.json");
        write_atomic(&path, b"hello").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "hello");
    }

    #[test]
    fn no_temp_files_left_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        write_atomic(&path, b"one").expect("write");
        write_atomic(&path, b"two").expect("write");
        let names: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("state.json")]);
    }

    #[test]
    fn failed_persist_leaves_target_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory in the target position makes the rename fail.
        let path = temp.path().join("target");
        fs::create_dir(&path).expect("mkdir");
        fs::write(path.join("keep"), "original").expect("seed");

        assert!(write_atomic(&path, b"new").is_err());
        assert_eq!(
            fs::read_to_string(path.join("keep")).expect("read"),
            "original"
        );
        let leftovers = fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(leftovers, 1, "temp file must be cleaned up");
    }

    #[test]
    fn write_new_refuses_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("event.json");
        write_atomic_new(&path, b"first").expect("first");
        assert!(write_atomic_new(&path, b"second").is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "first");
    }

    #[test]
    fn concurrent_writers_never_expose_partial_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = Arc::new(temp.path().join("shared.txt"));
        write_atomic(&path, payload(0, 0).as_bytes()).expect("seed");

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let path = Arc::clone(&path);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let contents = fs::read_to_string(path.as_path()).expect("read");
                    assert!(is_complete_payload(&contents), "torn read observed");
                    reads += 1;
                }
                reads
            })
        };

        let writers: Vec<_> = (0..8)
            .map(|writer| {
                let path = Arc::clone(&path);
                thread::spawn(move || {
                    for round in 0..25 {
                        write_atomic(&path, payload(writer, round).as_bytes()).expect("write");
                    }
                })
            })
            .collect();
        for handle in writers {
            handle.join().expect("writer thread");
        }
        done.store(true, Ordering::SeqCst);
        let reads = reader.join().expect("reader thread");
        assert!(reads > 0);

        let last = fs::read_to_string(path.as_path()).expect("read final");
        assert!(is_complete_payload(&last));
    }
}
