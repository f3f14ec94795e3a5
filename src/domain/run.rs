use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::domain::suite::Suite;

/// Appium target for mobile runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct MobileTarget {
    #[validate(length(min = 1, message = "Payload must include 'app_file_name'"))]
    pub app_file_name: String,
    pub platform_name: String,
    pub platform_version: String,
    pub device_name: String,
}

impl MobileTarget {
    pub const DEFAULT_PLATFORM_NAME: &'static str = "Android";
    pub const DEFAULT_PLATFORM_VERSION: &'static str = "13.0";
    pub const DEFAULT_DEVICE_NAME: &'static str = "Android Emulator";

    pub fn new(app_file_name: impl Into<String>) -> Self {
        Self {
            app_file_name: app_file_name.into(),
            platform_name: Self::DEFAULT_PLATFORM_NAME.to_string(),
            platform_version: Self::DEFAULT_PLATFORM_VERSION.to_string(),
            device_name: Self::DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_id: i64,
    pub suite: Suite,
    /// `None` and `Some(empty)` both mean "every case of the project".
    pub case_ids: Option<Vec<String>>,
    /// Required for [`Suite::App`], ignored otherwise.
    pub mobile: Option<MobileTarget>,
}

impl RunRequest {
    pub fn new(suite: Suite, project_id: i64) -> Self {
        Self {
            project_id,
            suite,
            case_ids: None,
            mobile: None,
        }
    }

    pub fn with_case_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.case_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_mobile(mut self, mobile: MobileTarget) -> Self {
        self.mobile = Some(mobile);
        self
    }
}

/// Everything the worker and the HTTP caller need to locate a run's artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct RunHandle {
    pub run_id: String,
    pub suite: Suite,
    pub project_id: i64,
    pub results_dir: PathBuf,
    pub report_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file_path: PathBuf,
    pub cases_file: PathBuf,
}

/// How the runner process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunVerdict {
    Passed,
    Failed { exit_code: i32 },
    SpawnFailed { message: String },
}

impl RunVerdict {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            RunVerdict::Passed
        } else {
            RunVerdict::Failed { exit_code: code }
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, RunVerdict::Passed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub suite: Suite,
    pub verdict: RunVerdict,
    pub bug_id: Option<i64>,
    pub report_generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Passed,
    Failed { exit_code: i32 },
    Errored { message: String },
}

impl From<&RunVerdict> for RunStatus {
    fn from(verdict: &RunVerdict) -> Self {
        match verdict {
            RunVerdict::Passed => RunStatus::Passed,
            RunVerdict::Failed { exit_code } => RunStatus::Failed {
                exit_code: *exit_code,
            },
            RunVerdict::SpawnFailed { message } => RunStatus::Errored {
                message: message.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub suite: Suite,
    pub project_id: i64,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub bug_id: Option<i64>,
    pub report_generated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_from_exit_code() {
        assert_eq!(RunVerdict::from_exit_code(0), RunVerdict::Passed);
        assert_eq!(
            RunVerdict::from_exit_code(2),
            RunVerdict::Failed { exit_code: 2 }
        );
        assert!(RunVerdict::SpawnFailed {
            message: "nope".into()
        }
        .is_failure());
    }

    #[test]
    fn mobile_target_requires_app_file() {
        assert!(MobileTarget::new("").validate().is_err());
        let target = MobileTarget::new("demo.apk");
        assert!(target.validate().is_ok());
        assert_eq!(target.platform_name, "Android");
        assert_eq!(target.device_name, "Android Emulator");
    }
}
