use chrono::Local;
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::case::CaseRecord;
use crate::domain::error::{AppError, Result};
use crate::domain::run::{MobileTarget, RunHandle};
use crate::domain::suite::Suite;
use crate::infrastructure::storage::{atomic_write_bytes, ensure_dir, DataLayout};

const RUN_ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Hands out second-resolution run ids, suffixed `-1`, `-2`, ... when the
/// base id was already issued in this process or is already on disk. All
/// suites share one data root, so two suites triggered in the same second
/// must not collide.
#[derive(Debug, Default)]
pub struct RunIdAllocator {
    last: Mutex<Option<(String, u32)>>,
}

impl RunIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, layout: &DataLayout) -> String {
        self.next_for(Local::now().format(RUN_ID_FORMAT).to_string(), layout)
    }

    fn next_for(&self, base: String, layout: &DataLayout) -> String {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut seq = match last.as_ref() {
            Some((prev, seq)) if *prev == base => seq + 1,
            _ => 0,
        };
        loop {
            let candidate = if seq == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, seq)
            };
            if !layout.run_exists(&candidate) {
                *last = Some((base, seq));
                return candidate;
            }
            seq += 1;
        }
    }
}

/// Creates the per-run directories and the transient case file.
#[derive(Debug)]
pub struct RunWorkspace {
    layout: DataLayout,
    ids: RunIdAllocator,
}

impl RunWorkspace {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            ids: RunIdAllocator::new(),
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Allocates a run id and materializes everything the runner reads or
    /// writes. Any failure here aborts the trigger.
    pub fn open(&self, suite: Suite, project_id: i64, cases: &[CaseRecord]) -> Result<RunHandle> {
        let run_id = self.ids.next(&self.layout);

        let results_dir = self.layout.results_dir(&run_id);
        let report_dir = self.layout.report_dir(&run_id);
        let log_dir = self.layout.log_dir(&run_id);
        ensure_dir(&results_dir)?;
        ensure_dir(&report_dir)?;
        ensure_dir(&log_dir)?;

        let cases_file = self.layout.cases_file(suite, &run_id);
        write_cases_file(&cases_file, project_id, cases)?;

        tracing::info!(
            suite = %suite,
            run_id = %run_id,
            project_id,
            cases = cases.len(),
            "run workspace created"
        );

        Ok(RunHandle {
            log_file_path: self.layout.log_file(&run_id),
            run_id,
            suite,
            project_id,
            results_dir,
            report_dir,
            log_dir,
            cases_file,
        })
    }
}

/// `{ "<project_id>": [cases...] }`, the shape the runner scripts expect.
fn write_cases_file(path: &Path, project_id: i64, cases: &[CaseRecord]) -> Result<()> {
    let mut body = Map::new();
    body.insert(project_id.to_string(), serde_json::to_value(cases)?);
    let bytes = serde_json::to_vec_pretty(&JsonValue::Object(body))?;
    atomic_write_bytes(path, &bytes).map_err(|e| {
        AppError::IoError(format!("Failed to write case file {}: {e}", path.display()))
    })
}

/// Typed environment handed to a runner process. Only turned into variables
/// at the spawn call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerEnv {
    pub project_id: i64,
    pub cases_file: PathBuf,
    /// Locator mapping for Web and App runs.
    pub elements_file: Option<PathBuf>,
    pub mobile: Option<MobileTarget>,
}

impl RunnerEnv {
    pub fn to_vars(&self, suite: Suite) -> Vec<(String, String)> {
        let cases_var = match suite {
            Suite::Web => "WEB_TEST_CASES_FILE",
            Suite::Api => "API_TEST_CASES_FILE",
            Suite::App => "APP_TEST_CASES_FILE",
        };
        let mut vars = vec![
            (cases_var.to_string(), self.cases_file.display().to_string()),
            ("PROJECT_ID".to_string(), self.project_id.to_string()),
        ];

        if let Some(elements) = &self.elements_file {
            let elements_var = match suite {
                Suite::App => "APP_ELEMENTS_FILE",
                _ => "UI_ELEMENTS_FILE",
            };
            vars.push((elements_var.to_string(), elements.display().to_string()));
        }

        if let Some(mobile) = &self.mobile {
            vars.push(("APP_FILE_NAME".to_string(), mobile.app_file_name.clone()));
            vars.push(("PLATFORM_NAME".to_string(), mobile.platform_name.clone()));
            vars.push(("PLATFORM_VERSION".to_string(), mobile.platform_version.clone()));
            vars.push(("DEVICE_NAME".to_string(), mobile.device_name.clone()));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn open_creates_dirs_and_case_file() {
        let tmp = TempDir::new().unwrap();
        let workspace = RunWorkspace::new(DataLayout::new(tmp.path()));
        let cases = vec![CaseRecord::from(json!({"id": 2, "action": "click"}))];

        let handle = workspace.open(Suite::Web, 7, &cases).unwrap();
        assert!(handle.results_dir.is_dir());
        assert!(handle.report_dir.is_dir());
        assert!(handle.log_dir.is_dir());
        assert_eq!(handle.log_file_path, handle.log_dir.join("run.log"));
        assert_eq!(handle.project_id, 7);

        let body: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(&handle.cases_file).unwrap()).unwrap();
        assert_eq!(body, json!({"7": [{"id": 2, "action": "click"}]}));
        assert!(handle
            .cases_file
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("tmp_web_cases_"));
    }

    #[test]
    fn same_second_ids_get_suffixes() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());
        let ids = RunIdAllocator::new();

        let first = ids.next_for("20240501101500".into(), &layout);
        let second = ids.next_for("20240501101500".into(), &layout);
        let third = ids.next_for("20240501101500".into(), &layout);
        assert_eq!(first, "20240501101500");
        assert_eq!(second, "20240501101500-1");
        assert_eq!(third, "20240501101500-2");

        let next_second = ids.next_for("20240501101501".into(), &layout);
        assert_eq!(next_second, "20240501101501");
    }

    #[test]
    fn existing_directories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());
        std::fs::create_dir_all(layout.log_dir("20240501101500")).unwrap();

        let ids = RunIdAllocator::new();
        assert_eq!(
            ids.next_for("20240501101500".into(), &layout),
            "20240501101500-1"
        );
    }

    #[test]
    fn concurrent_opens_never_share_a_run_id() {
        let tmp = TempDir::new().unwrap();
        let workspace = RunWorkspace::new(DataLayout::new(tmp.path()));
        let web = workspace.open(Suite::Web, 1, &[]).unwrap();
        let api = workspace.open(Suite::Api, 1, &[]).unwrap();
        assert_ne!(web.run_id, api.run_id);
        assert_ne!(web.log_dir, api.log_dir);
    }

    #[test]
    fn open_fails_when_data_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data");
        std::fs::write(&root, "not a dir").unwrap();
        let workspace = RunWorkspace::new(DataLayout::new(&root));
        assert!(workspace.open(Suite::Api, 1, &[]).is_err());
    }

    #[test]
    fn env_contract_per_suite() {
        let web = RunnerEnv {
            project_id: 3,
            cases_file: PathBuf::from("/d/tmp_web_cases_1.json"),
            elements_file: Some(PathBuf::from("/d/web_elements.json")),
            mobile: None,
        };
        let vars: HashMap<_, _> = web.to_vars(Suite::Web).into_iter().collect();
        assert_eq!(vars["WEB_TEST_CASES_FILE"], "/d/tmp_web_cases_1.json");
        assert_eq!(vars["UI_ELEMENTS_FILE"], "/d/web_elements.json");
        assert_eq!(vars["PROJECT_ID"], "3");

        let app = RunnerEnv {
            project_id: 1,
            cases_file: PathBuf::from("/d/tmp_app_cases_1.json"),
            elements_file: Some(PathBuf::from("/d/app_elements.json")),
            mobile: Some(MobileTarget::new("demo.apk")),
        };
        let vars: HashMap<_, _> = app.to_vars(Suite::App).into_iter().collect();
        assert_eq!(vars["APP_TEST_CASES_FILE"], "/d/tmp_app_cases_1.json");
        assert_eq!(vars["APP_ELEMENTS_FILE"], "/d/app_elements.json");
        assert_eq!(vars["APP_FILE_NAME"], "demo.apk");
        assert_eq!(vars["PLATFORM_VERSION"], "13.0");
        assert_eq!(vars["DEVICE_NAME"], "Android Emulator");
        assert!(!vars.contains_key("UI_ELEMENTS_FILE"));
    }
}
