use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::application::use_cases::load_test::{LoadTestService, LoadTestSettings};
use crate::application::use_cases::log_broadcaster::{BroadcasterLimits, LogBroadcaster};
use crate::application::use_cases::orchestrator::{Orchestrator, RunCollaborators};
use crate::domain::error::{AppError, Result};
use crate::domain::suite::Suite;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::report::{AllureReportGenerator, ReportGenerator};
use crate::infrastructure::storage::DataLayout;
use crate::infrastructure::store::{JsonBugStore, JsonCaseStore};
use crate::infrastructure::workspace::RunWorkspace;

pub const TEST_RUN_CHANNEL: &str = "test-run";
pub const LOADTEST_CHANNEL: &str = "loadtest";

/// Everything the HTTP layer serves from.
pub struct AppState {
    pub config: AppConfig,
    pub layout: DataLayout,
    pub orchestrator: Arc<Orchestrator>,
    pub load_tests: Arc<LoadTestService>,
}

/// Resolves paths, prepares the data directory and wires the collaborators.
/// Workers are spawned on `runtime`.
pub fn setup(mut config: AppConfig, runtime: Handle) -> Result<AppState> {
    let cwd = std::env::current_dir().map_err(|err| {
        error!(error = %err, "Failed to resolve working directory");
        AppError::from(err)
    })?;

    // Runners execute in `runner.root_dir`, so every path handed to them is made absolute.
    config.data_dir = absolutize(&cwd, &config.data_dir);
    config.runner.root_dir = absolutize(&cwd, &config.runner.root_dir);
    config.runner.scripts_dir = absolutize(&config.runner.root_dir, &config.runner.scripts_dir);
    config.runner.web_elements_file =
        absolutize(&config.runner.root_dir, &config.runner.web_elements_file);
    config.runner.app_elements_file =
        absolutize(&config.runner.root_dir, &config.runner.app_elements_file);

    let layout = DataLayout::new(&config.data_dir);
    layout.ensure().map_err(|err| {
        error!(error = %err, data_dir = %config.data_dir.display(), "Failed to create data dir");
        err
    })?;

    let limits = BroadcasterLimits {
        capacity: config.logs.capacity,
        replay: config.logs.replay,
        subscriber_queue: config.logs.subscriber_queue,
    };
    let test_run_logs = LogBroadcaster::new(TEST_RUN_CHANNEL, limits);
    let loadtest_logs = LogBroadcaster::new(LOADTEST_CHANNEL, limits);

    let cases = Arc::new(JsonCaseStore::new(
        config.cases_path(Suite::Web),
        config.cases_path(Suite::App),
        config.cases_path(Suite::Api),
    ));
    let bugs = Arc::new(JsonBugStore::new(config.bugs_path()));

    let reports: Option<Arc<dyn ReportGenerator>> = if !config.report.enabled {
        info!("Report generation disabled");
        None
    } else {
        match AllureReportGenerator::discover(&config.report.program) {
            Some(generator) => {
                info!(program = %generator.program().display(), "Report tool found");
                Some(Arc::new(generator) as Arc<dyn ReportGenerator>)
            }
            None => {
                warn!(program = %config.report.program, "Report tool not found on PATH; reports will be skipped");
                None
            }
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        runtime.clone(),
        config.runner.clone(),
        RunWorkspace::new(layout.clone()),
        RunCollaborators {
            cases,
            bugs,
            reports,
        },
        test_run_logs,
    ));

    let load_tests = Arc::new(LoadTestService::new(
        runtime,
        loadtest_logs,
        LoadTestSettings {
            tick: Duration::from_millis(config.loadtest.tick_ms),
            steady_ticks: config.loadtest.steady_ticks,
            locust_program: config.loadtest.locust_program.clone(),
            locustfile: absolutize(&cwd, &config.locustfile_path()),
            reports_root: layout.locust_reports_root().to_path_buf(),
        },
    ));

    info!(data_dir = %config.data_dir.display(), "Application state ready");
    Ok(AppState {
        config,
        layout,
        orchestrator,
        load_tests,
    })
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
