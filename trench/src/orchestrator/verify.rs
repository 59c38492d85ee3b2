//! `run_verification`: gate promotion on a shell command's exit status.

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::Orchestrator;
use crate::core::events::{TRANSITION, VERIFICATION_FINISHED};
use crate::core::naming::validate_name;
use crate::core::types::{SessionRecord, SessionStatus};
use crate::io::process::run_command_with_timeout;

/// Result of one verification run. `record` is the persisted state afterwards.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub record: SessionRecord,
}

impl Orchestrator {
    /// Run `command` (default: `verify.command`) via `sh -c` in the workspace.
    ///
    /// The session moves to `Testing` first, then to `Ready` on exit 0 or
    /// `Failed` otherwise. A failing command is not an error of this call; check
    /// [`VerifyOutcome::passed`].
    #[instrument(skip_all, fields(name = %name))]
    pub fn run_verification(&self, name: &str, command: Option<&str>) -> Result<VerifyOutcome> {
        validate_name(name)?;
        let _lock = self.lock_session(name)?;
        let (paths, mut record) = self.load_existing(name)?;
        let command = command.unwrap_or(&self.config.verify.command).to_string();

        self.advance(
            &paths,
            &mut record,
            SessionStatus::Testing,
            TRANSITION,
            json!({ "command": command }),
        )?;
        info!(name, command = %command, "verification started");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).current_dir(&paths.workspace);
        let timeout = Duration::from_secs(self.config.verify.timeout_secs);
        let output =
            match run_command_with_timeout(cmd, timeout, self.config.verify.output_limit_bytes) {
                Ok(output) => output,
                Err(err) => {
                    record.test_output.clear();
                    record.error = format!("verification could not run: {err:#}");
                    let payload = json!({ "error": record.error });
                    self.advance(
                        &paths,
                        &mut record,
                        SessionStatus::Failed,
                        VERIFICATION_FINISHED,
                        payload,
                    )?;
                    return Err(err.context(format!("run verification for session '{name}'")));
                }
            };

        let passed = output.success();
        record.test_output = output.combined();
        record.error = if passed {
            String::new()
        } else if output.timed_out {
            format!("verification timed out after {}s", timeout.as_secs())
        } else {
            match output.status.code() {
                Some(code) => format!("verification exited with status {code}"),
                None => "verification terminated by a signal".to_string(),
            }
        };
        let next = if passed {
            SessionStatus::Ready
        } else {
            SessionStatus::Failed
        };
        let error = (!passed).then(|| record.error.clone());
        self.advance(
            &paths,
            &mut record,
            next,
            VERIFICATION_FINISHED,
            json!({
                "exit_code": output.status.code(),
                "timed_out": output.timed_out,
                "error": error,
            }),
        )?;
        if passed {
            info!(name, "verification passed");
        } else {
            warn!(name, error = %record.error, "verification failed");
        }

        Ok(VerifyOutcome {
            passed,
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            record,
        })
    }
}
