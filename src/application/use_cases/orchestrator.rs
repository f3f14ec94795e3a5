//! Per-suite trigger and the detached worker that supervises one run.
//!
//! Idle -> (trigger, permit acquired) -> Running -> (worker: process,
//! escalation, report) -> Idle. The permit moves into the worker and is
//! released when the worker ends, however it ends.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{File as TokioFile, OpenOptions as TokioOpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use validator::{Validate, ValidationErrors};

use crate::application::use_cases::admission::{AdmissionPermit, RunAdmissionGuard};
use crate::application::use_cases::case_selector::CaseSelector;
use crate::application::use_cases::failure_escalator::{EscalationOutcome, FailureEscalator};
use crate::application::use_cases::log_broadcaster::LogBroadcaster;
use crate::application::use_cases::run_registry::RunRegistry;
use crate::domain::error::{AppError, RunError};
use crate::domain::run::{MobileTarget, RunHandle, RunOutcome, RunRequest, RunVerdict};
use crate::domain::suite::Suite;
use crate::infrastructure::config::RunnerConfig;
use crate::infrastructure::process_runner::{CommandSpec, LineSink, ProcessRunner};
use crate::infrastructure::report::ReportGenerator;
use crate::infrastructure::store::{BugSink, CaseSource};
use crate::infrastructure::workspace::{RunWorkspace, RunnerEnv};

/// External systems a run talks to.
pub struct RunCollaborators {
    pub cases: Arc<dyn CaseSource>,
    pub bugs: Arc<dyn BugSink>,
    /// `None` when no report tool is installed.
    pub reports: Option<Arc<dyn ReportGenerator>>,
}

/// Returned by a successful trigger. Dropping `worker` detaches the run.
pub struct StartedRun {
    pub handle: RunHandle,
    pub worker: JoinHandle<RunOutcome>,
}

pub struct Orchestrator {
    runtime: Handle,
    guard: Arc<RunAdmissionGuard>,
    selector: CaseSelector,
    workspace: RunWorkspace,
    runner: ProcessRunner,
    runner_config: RunnerConfig,
    broadcaster: LogBroadcaster,
    escalator: FailureEscalator,
    reports: Option<Arc<dyn ReportGenerator>>,
    registry: RunRegistry,
}

impl Orchestrator {
    /// Workers are spawned on `runtime`, independent of whichever runtime
    /// serves the triggering request.
    pub fn new(
        runtime: Handle,
        runner_config: RunnerConfig,
        workspace: RunWorkspace,
        collaborators: RunCollaborators,
        broadcaster: LogBroadcaster,
    ) -> Self {
        Self {
            runtime,
            guard: Arc::new(RunAdmissionGuard::new()),
            selector: CaseSelector::new(collaborators.cases),
            workspace,
            runner: ProcessRunner::new(),
            runner_config,
            broadcaster,
            escalator: FailureEscalator::new(collaborators.bugs),
            reports: collaborators.reports,
            registry: RunRegistry::default(),
        }
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn workspace(&self) -> &RunWorkspace {
        &self.workspace
    }

    pub fn reports(&self) -> Option<&Arc<dyn ReportGenerator>> {
        self.reports.as_ref()
    }

    pub fn is_running(&self, suite: Suite) -> bool {
        self.guard.is_running(suite)
    }

    /// Validates, admits, prepares the workspace and starts the worker. Returns
    /// as soon as the worker is spawned.
    pub async fn trigger(self: &Arc<Self>, request: RunRequest) -> Result<StartedRun, RunError> {
        let RunRequest {
            project_id,
            suite,
            case_ids,
            mobile,
        } = request;

        let mobile = match suite {
            Suite::App => {
                let target = mobile.ok_or_else(|| {
                    RunError::Validation("Payload must include 'app_file_name'".to_string())
                })?;
                target
                    .validate()
                    .map_err(|e| RunError::Validation(validation_message(&e)))?;
                Some(target)
            }
            Suite::Web | Suite::Api => None,
        };

        let Some(permit) = self.guard.permit(suite) else {
            tracing::warn!(suite = %suite, project_id, "trigger rejected: suite already running");
            return Err(RunError::AdmissionConflict(suite));
        };
        tracing::info!(suite = %suite, project_id, "trigger admitted");

        let cases = match self
            .selector
            .select(suite, project_id, case_ids.as_deref())
            .await
        {
            Ok(cases) => cases,
            Err(err) => {
                tracing::warn!(suite = %suite, project_id, error = %err, "failed to load cases, running with none");
                Vec::new()
            }
        };

        let this = Arc::clone(self);
        let joined =
            tokio::task::spawn_blocking(move || this.workspace.open(suite, project_id, &cases))
                .await;
        let handle = match joined {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                tracing::error!(suite = %suite, project_id, error = %err, "failed to prepare run workspace");
                return Err(RunError::Workspace(err));
            }
            Err(join_err) => {
                tracing::error!(suite = %suite, project_id, error = %join_err, "workspace task failed");
                return Err(RunError::Workspace(AppError::Internal(join_err.to_string())));
            }
        };

        self.registry.record_started(&handle);
        let worker = self
            .runtime
            .spawn(Arc::clone(self).execute(handle.clone(), mobile, permit));

        Ok(StartedRun { handle, worker })
    }

    async fn execute(
        self: Arc<Self>,
        handle: RunHandle,
        mobile: Option<MobileTarget>,
        permit: AdmissionPermit,
    ) -> RunOutcome {
        let _permit = permit;
        let suite = handle.suite;
        let label = suite.log_label();
        let mut transcript =
            RunTranscript::open(&handle.log_file_path, self.broadcaster.clone()).await;

        let spec = self.command_for(&handle, mobile);
        tracing::info!(suite = %suite, run_id = %handle.run_id, program = %spec.program, "process spawned");

        let verdict = match self.runner.run(&spec, &mut transcript, None).await {
            Ok(code) => {
                transcript
                    .write_line(&format!("[{}] finished with code {}", label, code))
                    .await;
                tracing::info!(suite = %suite, run_id = %handle.run_id, exit_code = code, "process finished");
                RunVerdict::from_exit_code(code)
            }
            Err(err) => {
                transcript
                    .write_line(&format!("[{}] error: {}", label, err))
                    .await;
                tracing::error!(suite = %suite, run_id = %handle.run_id, error = %err, "runner could not be started");
                RunVerdict::SpawnFailed {
                    message: err.to_string(),
                }
            }
        };

        let bug_id = match self
            .escalator
            .on_run_finished(suite, &handle.run_id, handle.project_id, &verdict, &handle.report_dir)
            .await
        {
            EscalationOutcome::NotNeeded => None,
            EscalationOutcome::Filed(bug_id) => {
                transcript
                    .write_line(&format!("[{}] bug #{} filed automatically", label, bug_id))
                    .await;
                Some(bug_id)
            }
            EscalationOutcome::Failed(err) => {
                transcript
                    .write_line(&format!("[{}] automatic bug filing failed: {}", label, err))
                    .await;
                None
            }
        };

        let report_generated = self.generate_report(&handle, &mut transcript).await;

        let outcome = RunOutcome {
            run_id: handle.run_id.clone(),
            suite,
            verdict,
            bug_id,
            report_generated,
        };
        self.registry.record_finished(&outcome);
        tracing::info!(suite = %suite, run_id = %handle.run_id, verdict = ?outcome.verdict, "run finished");
        outcome
    }

    async fn generate_report(&self, handle: &RunHandle, transcript: &mut RunTranscript) -> bool {
        let Some(reports) = &self.reports else {
            return false;
        };
        match reports
            .generate(&handle.results_dir, &handle.report_dir)
            .await
        {
            Ok(()) => {
                tracing::info!(suite = %handle.suite, run_id = %handle.run_id, "report generated");
                true
            }
            Err(err) => {
                transcript
                    .write_line(&format!(
                        "[{}] report generation failed: {}",
                        handle.suite.log_label(),
                        err
                    ))
                    .await;
                tracing::warn!(suite = %handle.suite, run_id = %handle.run_id, error = %err, "report generation failed");
                false
            }
        }
    }

    fn command_for(&self, handle: &RunHandle, mobile: Option<MobileTarget>) -> CommandSpec {
        let suite = handle.suite;
        let template = self.runner_config.command(suite);
        let script = self.runner_config.script_path(suite);
        let env = RunnerEnv {
            project_id: handle.project_id,
            cases_file: handle.cases_file.clone(),
            elements_file: match suite {
                Suite::Web => Some(self.runner_config.web_elements_file.clone()),
                Suite::App => Some(self.runner_config.app_elements_file.clone()),
                Suite::Api => None,
            },
            mobile,
        };

        CommandSpec::new(template.program.clone())
            .args(template.render_args(&script, &handle.results_dir, &handle.run_id))
            .cwd(self.runner_config.root_dir.clone())
            .envs(env.to_vars(suite))
    }
}

fn validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|err| err.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

/// Writes each line to run.log (flushed per line) and to the live channel.
struct RunTranscript {
    file: Option<TokioFile>,
    broadcaster: LogBroadcaster,
}

impl RunTranscript {
    async fn open(path: &Path, broadcaster: LogBroadcaster) -> Self {
        let file = match TokioOpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to open run log, streaming live only");
                None
            }
        };
        Self { file, broadcaster }
    }

    async fn write_line(&mut self, line: &str) {
        if let Some(file) = self.file.as_mut() {
            let mut bytes = Vec::with_capacity(line.len() + 1);
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
            let written = match file.write_all(&bytes).await {
                Ok(()) => file.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                tracing::error!(error = %err, "failed to append to run log");
                self.file = None;
            }
        }
        self.broadcaster.publish(line);
    }
}

#[async_trait]
impl LineSink for RunTranscript {
    async fn on_line(&mut self, line: &str) {
        self.write_line(line).await;
    }
}
