use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::error::{AppError, Result};
use crate::domain::suite::Suite;

fn io_err(msg: impl Into<String>) -> AppError {
    AppError::IoError(msg.into())
}

/// On-disk layout under the configured data directory.
///
/// ```text
/// <data>/results/<run_id>/         raw runner results
/// <data>/report/<run_id>/          generated report
/// <data>/log/<run_id>/run.log      combined transcript
/// <data>/locust-reports/<run_id>/  load test CSV stats
/// <data>/tmp_<suite>_cases_<run_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    results: PathBuf,
    report: PathBuf,
    log: PathBuf,
    locust_reports: PathBuf,
}

impl DataLayout {
    pub const RUN_LOG_FILE: &'static str = "run.log";

    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.to_path_buf(),
            results: data_dir.join("results"),
            report: data_dir.join("report"),
            log: data_dir.join("log"),
            locust_reports: data_dir.join("locust-reports"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        ensure_dir(&self.root)?;
        ensure_dir(&self.results)?;
        ensure_dir(&self.report)?;
        ensure_dir(&self.log)?;
        ensure_dir(&self.locust_reports)?;
        Ok(())
    }

    pub fn results_root(&self) -> &Path {
        &self.results
    }

    pub fn report_root(&self) -> &Path {
        &self.report
    }

    pub fn locust_reports_root(&self) -> &Path {
        &self.locust_reports
    }

    pub fn results_dir(&self, run_id: &str) -> PathBuf {
        self.results.join(run_id)
    }

    pub fn report_dir(&self, run_id: &str) -> PathBuf {
        self.report.join(run_id)
    }

    pub fn log_dir(&self, run_id: &str) -> PathBuf {
        self.log.join(run_id)
    }

    pub fn log_file(&self, run_id: &str) -> PathBuf {
        self.log_dir(run_id).join(Self::RUN_LOG_FILE)
    }

    pub fn cases_file(&self, suite: Suite, run_id: &str) -> PathBuf {
        self.root
            .join(format!("tmp_{}_cases_{}.json", suite.as_str(), run_id))
    }

    /// True if any directory belonging to `run_id` is already on disk.
    pub fn run_exists(&self, run_id: &str) -> bool {
        self.results_dir(run_id).exists()
            || self.report_dir(run_id).exists()
            || self.log_dir(run_id).exists()
    }
}

/// A per-run directory as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunDirEntry {
    pub name: String,
    pub path: String,
}

/// Immediate sub-directories of `root`, newest run id first. A missing root
/// lists as empty.
pub fn list_run_dirs(root: &Path) -> Result<Vec<RunDirEntry>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(io_err(format!(
                "Failed to list {}: {err}",
                root.display()
            )))
        }
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(format!("Failed to list {}: {e}", root.display())))?;
        if !entry.path().is_dir() {
            continue;
        }
        dirs.push(RunDirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().display().to_string(),
        });
    }
    dirs.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(dirs)
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| io_err(format!("Failed to create dir {}: {e}", path.display())))?;
    Ok(())
}

/// Write through a uniquely named temp file in the same directory, then rename
/// over `path`.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| {
            io_err(format!(
                "Failed to create temp file {}: {e}",
                tmp_path.display()
            ))
        })?;
        file.write_all(bytes).map_err(|e| {
            io_err(format!(
                "Failed to write temp file {}: {e}",
                tmp_path.display()
            ))
        })?;
        file.sync_all().ok();
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_err(format!(
            "Failed to rename temp file {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_paths_are_run_scoped() {
        let layout = DataLayout::new(Path::new("/srv/data"));
        assert_eq!(
            layout.log_file("20240101120000"),
            PathBuf::from("/srv/data/log/20240101120000/run.log")
        );
        assert_eq!(
            layout.cases_file(Suite::Api, "20240101120000"),
            PathBuf::from("/srv/data/tmp_api_cases_20240101120000.json")
        );
        assert_eq!(
            layout.report_dir("x"),
            PathBuf::from("/srv/data/report/x")
        );
    }

    #[test]
    fn ensure_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(&tmp.path().join("data"));
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.results_root().is_dir());
        assert!(layout.locust_reports_root().is_dir());
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("bugs.json");
        atomic_write_bytes(&path, b"first").unwrap();
        atomic_write_bytes(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn run_dirs_listed_newest_first() {
        let tmp = TempDir::new().unwrap();
        for name in ["20240101000001", "20240101000003", "20240101000002"] {
            fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        let names: Vec<String> = list_run_dirs(tmp.path())
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(
            names,
            vec!["20240101000003", "20240101000002", "20240101000001"]
        );
        assert!(list_run_dirs(&tmp.path().join("missing")).unwrap().is_empty());
    }
}
