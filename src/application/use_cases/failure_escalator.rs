use std::path::Path;
use std::sync::Arc;

use crate::domain::bug::BugTicket;
use crate::domain::error::EscalationError;
use crate::domain::run::RunVerdict;
use crate::domain::suite::Suite;
use crate::infrastructure::store::BugSink;

#[derive(Debug)]
pub enum EscalationOutcome {
    /// The run passed.
    NotNeeded,
    Filed(i64),
    Failed(EscalationError),
}

/// Files one bug ticket per failed run.
pub struct FailureEscalator {
    bugs: Arc<dyn BugSink>,
}

impl FailureEscalator {
    pub fn new(bugs: Arc<dyn BugSink>) -> Self {
        Self { bugs }
    }

    /// Never returns an error: a broken bug store is reported through the
    /// outcome and the run carries on.
    pub async fn on_run_finished(
        &self,
        suite: Suite,
        run_id: &str,
        project_id: i64,
        verdict: &RunVerdict,
        report_dir: &Path,
    ) -> EscalationOutcome {
        if !verdict.is_failure() {
            return EscalationOutcome::NotNeeded;
        }

        let ticket = build_ticket(suite, run_id, verdict, report_dir);
        match self.bugs.create_bug(project_id, &ticket).await {
            Ok(bug_id) => {
                tracing::info!(suite = %suite, run_id, project_id, bug_id, "bug ticket filed");
                EscalationOutcome::Filed(bug_id)
            }
            Err(err) => {
                tracing::error!(suite = %suite, run_id, project_id, error = %err, "bug ticket creation failed");
                EscalationOutcome::Failed(err.into())
            }
        }
    }
}

pub fn build_ticket(suite: Suite, run_id: &str, verdict: &RunVerdict, report_dir: &Path) -> BugTicket {
    let cause = match verdict {
        RunVerdict::Passed => String::new(),
        RunVerdict::Failed { exit_code } => format!(" Runner exited with code {}.", exit_code),
        RunVerdict::SpawnFailed { message } => format!(" Runner could not be started: {}.", message),
    };
    BugTicket {
        title: format!("automated test failed - {} - {}", suite.display_name(), run_id),
        description: format!("Automated test run failed.{}", cause),
        repro: format!(
            "Run ID: {}. See the report at {} for details.",
            run_id,
            report_dir.display()
        ),
        severity: BugTicket::DEFAULT_SEVERITY.to_string(),
        status: BugTicket::DEFAULT_STATUS.to_string(),
        note: BugTicket::SYSTEM_NOTE.to_string(),
    }
}
