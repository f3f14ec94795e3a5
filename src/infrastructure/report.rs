use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

use crate::domain::error::ReportError;

/// Builds a human report from a run's raw results. Optional: when no tool is
/// available the orchestrator holds `None` and skips reporting.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, results_dir: &Path, report_dir: &Path) -> Result<(), ReportError>;
}

/// `allure generate <results> -o <report> -c`
#[derive(Debug, Clone)]
pub struct AllureReportGenerator {
    program: PathBuf,
}

impl AllureReportGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolves `program` on `PATH`; `None` when it is not installed.
    pub fn discover(program: &str) -> Option<Self> {
        let path = std::env::var_os("PATH");
        find_executable(program, path.as_deref()).map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl ReportGenerator for AllureReportGenerator {
    async fn generate(&self, results_dir: &Path, report_dir: &Path) -> Result<(), ReportError> {
        let output = TokioCommand::new(&self.program)
            .arg("generate")
            .arg(results_dir)
            .arg("-o")
            .arg(report_dir)
            .arg("-c")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ReportError::Launch(format!("{}: {e}", self.program.display())))?;

        if output.status.success() {
            return Ok(());
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ReportError::Failed {
            code: output.status.code().unwrap_or(-1),
            output: text.trim_end().to_string(),
        })
    }
}

/// An explicit path is checked as-is; a bare name is searched in `path_var`.
pub fn find_executable(program: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if program.trim().is_empty() {
        return None;
    }
    let explicit = Path::new(program);
    if explicit.components().count() > 1 || explicit.is_absolute() {
        return is_executable_file(explicit).then(|| explicit.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(path_var).find_map(|dir| {
        let candidate = dir.join(program);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{program}.exe"));
            if is_executable_file(&exe) {
                return Some(exe);
            }
        }
        None
    })
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn finds_only_executables_on_path() {
        let tmp = TempDir::new().unwrap();
        write_script(tmp.path(), "allure", "exit 0");
        std::fs::write(tmp.path().join("not-exec"), "x").unwrap();

        let path_var = std::env::join_paths([tmp.path()]).unwrap();
        assert_eq!(
            find_executable("allure", Some(&path_var)),
            Some(tmp.path().join("allure"))
        );
        assert!(find_executable("not-exec", Some(&path_var)).is_none());
        assert!(find_executable("missing", Some(&path_var)).is_none());
        assert!(find_executable("allure", None).is_none());
    }

    #[tokio::test]
    async fn successful_tool_returns_ok() {
        let tmp = TempDir::new().unwrap();
        let tool = write_script(tmp.path(), "fake-allure", "mkdir -p \"$4\" && echo generated");
        let report_dir = tmp.path().join("report");

        AllureReportGenerator::new(&tool)
            .generate(&tmp.path().join("results"), &report_dir)
            .await
            .unwrap();
        assert!(report_dir.is_dir());
    }

    #[tokio::test]
    async fn failing_tool_reports_its_output() {
        let tmp = TempDir::new().unwrap();
        let tool = write_script(tmp.path(), "fake-allure", "echo 'no results found' 1>&2; exit 2");

        let err = AllureReportGenerator::new(&tool)
            .generate(&tmp.path().join("results"), &tmp.path().join("report"))
            .await
            .unwrap_err();
        match err {
            ReportError::Failed { code, output } => {
                assert_eq!(code, 2);
                assert!(output.contains("no results found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
