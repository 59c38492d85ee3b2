//! `merge`: promote a `Ready` session into the controller's current branch.

use anyhow::Result;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::Orchestrator;
use crate::core::events::MERGE_FAILED;
use crate::core::naming::validate_name;
use crate::core::types::{SessionRecord, SessionStatus};
use crate::error::TrenchError;
use crate::io::git::MergeResult;
use crate::io::lock::ExclusiveLock;
use crate::io::session_store::save_record;

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub record: SessionRecord,
    pub branch_deleted: bool,
}

impl Orchestrator {
    /// Merge session `name` with `--no-ff` and reclaim its workspace.
    ///
    /// Anything but `Ready` is refused before touching git. A failed merge is
    /// aborted in the controller, the session becomes `Failed` with git's
    /// output, and the workspace is kept for inspection.
    #[instrument(skip_all, fields(name = %name, delete_branch = delete_branch))]
    pub fn merge(&self, name: &str, delete_branch: bool) -> Result<MergeOutcome> {
        validate_name(name)?;
        let _lock = self.lock_session(name)?;
        let (paths, mut record) = self.load_existing(name)?;
        if record.status != SessionStatus::Ready {
            return Err(TrenchError::InvalidState {
                name: name.to_string(),
                operation: "merge",
                expected: "ready",
                actual: record.status,
            }
            .into());
        }
        let _merge_lock =
            ExclusiveLock::hold(self.paths.lock_path("merge"), self.lock_timeout())?;

        let message = format!("Merge session '{name}' ({})", record.branch);
        match self.git.merge_no_ff(&record.branch, &message)? {
            MergeResult::Failed { detail } => {
                if let Err(err) = self.git.merge_abort() {
                    warn!(err = %format!("{err:#}"), "merge --abort failed");
                }
                record.error.clone_from(&detail);
                self.advance(
                    &paths,
                    &mut record,
                    SessionStatus::Failed,
                    MERGE_FAILED,
                    json!({ "error": detail }),
                )?;
                Err(TrenchError::MergeConflict {
                    name: name.to_string(),
                    detail,
                }
                .into())
            }
            MergeResult::Merged => {
                record.transition(SessionStatus::Merged)?;
                save_record(&paths, &mut record)?;
                info!(name, branch = %record.branch, "session merged");

                self.remove_workspace(&paths.workspace)?;
                let branch_deleted = delete_branch && self.delete_merged_branch(&record.branch);
                self.tracker.unregister(name)?;
                Ok(MergeOutcome {
                    record,
                    branch_deleted,
                })
            }
        }
    }

    fn delete_merged_branch(&self, branch: &str) -> bool {
        match self.git.delete_branch(branch, false) {
            Ok(()) => true,
            Err(err) => {
                warn!(branch, err = %format!("{err:#}"), "could not delete merged branch");
                false
            }
        }
    }
}
