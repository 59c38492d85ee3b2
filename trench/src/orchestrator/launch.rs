//! `launch_session`: start the supervised agent inside a `Running` session.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, instrument};

use super::Orchestrator;
use crate::core::complexity::classify_task;
use crate::core::events::LAUNCHED;
use crate::core::naming::validate_name;
use crate::core::types::{Complexity, SessionRecord, SessionStatus};
use crate::error::TrenchError;
use crate::io::event_log::EventLog;
use crate::io::launcher::{LaunchRequest, launch_detached};
use crate::io::session_store::save_record;

/// Outcome of a launch.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub pid: u32,
    pub model: String,
    pub complexity: Complexity,
    pub record: SessionRecord,
}

impl Orchestrator {
    /// Launch the configured agent on `task`.
    ///
    /// Without an explicit `model` the task is classified and routed to the
    /// configured tier for its complexity.
    #[instrument(skip_all, fields(name = %name))]
    pub fn launch_session(
        &self,
        name: &str,
        task: &str,
        model: Option<&str>,
    ) -> Result<LaunchOutcome> {
        validate_name(name)?;
        let _lock = self.lock_session(name)?;
        let (paths, mut record) = self.load_existing(name)?;
        if record.status != SessionStatus::Running {
            return Err(TrenchError::InvalidState {
                name: name.to_string(),
                operation: "launch",
                expected: "running",
                actual: record.status,
            }
            .into());
        }
        if let Some(pid) = record.pid
            && self.tracker.is_alive(name)?
        {
            return Err(TrenchError::AlreadyExists {
                name: name.to_string(),
                detail: format!("agent pid {pid} is still running"),
            }
            .into());
        }

        let complexity = classify_task(task);
        let model = model
            .map(str::to_string)
            .unwrap_or_else(|| self.config.agent.model_for(complexity).to_string());

        let request = LaunchRequest {
            program: self.config.agent.command.clone(),
            task: task.to_string(),
            model: model.clone(),
            workdir: paths.workspace.clone(),
            log_path: paths.log_path.clone(),
        };
        let pid = launch_detached(&request)?;
        self.tracker
            .register(pid, name)
            .with_context(|| format!("register agent pid {pid} for session '{name}'"))?;

        record.pid = Some(pid);
        record.task = Some(task.to_string());
        record.model = Some(model.clone());
        record.complexity = Some(complexity);
        save_record(&paths, &mut record)?;
        EventLog::new(&paths.events_dir).emit(
            LAUNCHED,
            json!({
                "status": record.status,
                "pid": pid,
                "model": model,
                "complexity": complexity,
            }),
        )?;
        info!(name, pid, model = %model, %complexity, "session launched");

        Ok(LaunchOutcome {
            pid,
            model,
            complexity,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::core::types::{Complexity, SessionStatus};
    use crate::error::{TrenchError, find_trench_error};
    use crate::test_support::TestRepo;

    #[test]
    fn launch_routes_by_complexity_and_records_pid() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.spawn("typo", None).expect("spawn");

        let outcome = orch
            .launch_session("typo", "fix typo in README", None)
            .expect("launch");
        assert_eq!(outcome.complexity, Complexity::Simple);
        assert_eq!(outcome.model, "haiku");
        assert_eq!(outcome.record.pid, Some(outcome.pid));
        assert_eq!(
            orch.tracker().get("typo").expect("get").map(|p| p.pid),
            Some(outcome.pid)
        );

        let finished = orch
            .tracker()
            .wait_for_completion("typo", Duration::from_secs(10), Duration::from_millis(20))
            .expect("wait");
        assert!(finished);
        let log = std::fs::read_to_string(orch.session_paths("typo").log_path).expect("log");
        assert!(log.contains("model=haiku"), "{log}");
    }

    #[test]
    fn explicit_model_wins() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.spawn("arch", None).expect("spawn");
        let outcome = orch
            .launch_session("arch", "redesign the storage architecture", Some("custom"))
            .expect("launch");
        assert_eq!(outcome.complexity, Complexity::Complex);
        assert_eq!(outcome.model, "custom");
        let view = orch
            .event_log("arch")
            .compute_state(crate::core::events::reduce_session, Default::default())
            .expect("view");
        assert_eq!(view.pid, Some(outcome.pid));
        assert_eq!(view.status, Some(SessionStatus::Running));
    }

    #[test]
    fn launch_requires_running() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.spawn("v", None).expect("spawn");
        orch.run_verification("v", Some("true")).expect("verify");
        let err = orch.launch_session("v", "anything", None).unwrap_err();
        assert!(matches!(
            find_trench_error(&err),
            Some(TrenchError::InvalidState { .. })
        ));
    }
}
