use serde::Serialize;
use thiserror::Error;

use crate::domain::suite::Suite;

#[derive(Debug, Error, Serialize)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::StorageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failures surfaced synchronously by a trigger call. Anything that goes wrong
/// after the worker starts is reported through the run transcript instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{} test run is already in progress", .0.display_name())]
    AdmissionConflict(Suite),
    #[error("{0}")]
    Validation(String),
    #[error("Failed to prepare run workspace: {0}")]
    Workspace(AppError),
}

impl RunError {
    pub fn status_code(&self) -> u16 {
        match self {
            RunError::AdmissionConflict(_) => 409,
            RunError::Validation(_) => 400,
            RunError::Workspace(_) => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadTestError {
    #[error("{0} already running")]
    AlreadyRunning(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("Failed to prepare load test: {0}")]
    Workspace(AppError),
}

impl LoadTestError {
    pub fn status_code(&self) -> u16 {
        match self {
            LoadTestError::AlreadyRunning(_) => 409,
            LoadTestError::Validation(_) => 400,
            LoadTestError::Workspace(_) => 500,
        }
    }
}

/// The runner process could not be started at all.
#[derive(Debug, Error)]
#[error("failed to spawn `{program}`: {reason}")]
pub struct SpawnError {
    pub program: String,
    pub reason: String,
}

/// The report tool ran but did not produce a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report tool could not be started: {0}")]
    Launch(String),
    #[error("report tool exited with code {code}: {output}")]
    Failed { code: i32, output: String },
}

#[derive(Debug, Error)]
#[error("bug ticket creation failed: {0}")]
pub struct EscalationError(pub String);

impl From<AppError> for EscalationError {
    fn from(err: AppError) -> Self {
        EscalationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_error_maps_to_http_status() {
        assert_eq!(RunError::AdmissionConflict(Suite::Web).status_code(), 409);
        assert_eq!(RunError::Validation("x".into()).status_code(), 400);
        assert_eq!(
            RunError::Workspace(AppError::IoError("disk full".into())).status_code(),
            500
        );
    }

    #[test]
    fn conflict_message_names_the_suite() {
        let msg = RunError::AdmissionConflict(Suite::Api).to_string();
        assert_eq!(msg, "API test run is already in progress");
    }
}
