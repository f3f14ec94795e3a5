//! Load tests publish to their own channel and, unlike suite runs, can be
//! stopped. Two modes: a simulated user ramp, and a real headless Locust run.

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use validator::Validate;

use crate::application::use_cases::log_broadcaster::LogBroadcaster;
use crate::domain::error::{AppError, LoadTestError, Result};
use crate::infrastructure::process_runner::{CommandSpec, LineSink, ProcessRunner};
use crate::infrastructure::locust_csv::{read_locust_report, LocustReport};
use crate::infrastructure::storage::{ensure_dir, list_run_dirs, RunDirEntry};

const DEFAULT_LOCUSTFILE: &str = "from locust import HttpUser, task, between\n\nclass QuickUser(HttpUser):\n    wait_time = between(1, 2)\n    @task\n    def index(self):\n        self.client.get('/')\n";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoadTestParams {
    #[serde(default = "default_total_users")]
    #[validate(range(min = 1, message = "total_users must be at least 1"))]
    pub total_users: u32,
    #[serde(default = "default_spawn_rate")]
    #[validate(range(min = 1, message = "spawn_rate must be at least 1"))]
    pub spawn_rate: u32,
    #[serde(default = "default_host")]
    #[validate(length(min = 1, message = "host must not be empty"))]
    pub host: String,
}

fn default_total_users() -> u32 {
    50
}

fn default_spawn_rate() -> u32 {
    5
}

fn default_host() -> String {
    "http://localhost".to_string()
}

impl Default for LoadTestParams {
    fn default() -> Self {
        Self {
            total_users: default_total_users(),
            spawn_rate: default_spawn_rate(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadTestSettings {
    pub tick: Duration,
    pub steady_ticks: u32,
    pub locust_program: String,
    pub locustfile: PathBuf,
    pub reports_root: PathBuf,
}

/// Clears its flag when dropped, so a finished or panicked worker frees the slot.
struct Slot(Arc<AtomicBool>);

impl Slot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Slot(Arc::clone(flag)))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct StartedLocust {
    pub run_id: String,
    pub csv_prefix: PathBuf,
    pub worker: JoinHandle<()>,
}

pub struct LoadTestService {
    runtime: Handle,
    broadcaster: LogBroadcaster,
    settings: LoadTestSettings,
    runner: ProcessRunner,
    simulated_active: Arc<AtomicBool>,
    simulated_stop: Arc<AtomicBool>,
    locust_active: Arc<AtomicBool>,
    locust_stop: Mutex<Option<Arc<Notify>>>,
}

impl LoadTestService {
    pub fn new(runtime: Handle, broadcaster: LogBroadcaster, settings: LoadTestSettings) -> Self {
        Self {
            runtime,
            broadcaster,
            settings,
            runner: ProcessRunner::new(),
            simulated_active: Arc::new(AtomicBool::new(false)),
            simulated_stop: Arc::new(AtomicBool::new(false)),
            locust_active: Arc::new(AtomicBool::new(false)),
            locust_stop: Mutex::new(None),
        }
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }

    pub fn is_simulation_running(&self) -> bool {
        self.simulated_active.load(Ordering::Acquire)
    }

    pub fn is_locust_running(&self) -> bool {
        self.locust_active.load(Ordering::Acquire)
    }

    /// Ramps simulated users by `spawn_rate` per tick up to `total_users`,
    /// holds for the configured steady ticks, then stops.
    pub fn start_simulation(&self, params: LoadTestParams) -> std::result::Result<JoinHandle<()>, LoadTestError> {
        params
            .validate()
            .map_err(|e| LoadTestError::Validation(e.to_string()))?;
        let slot = Slot::acquire(&self.simulated_active)
            .ok_or(LoadTestError::AlreadyRunning("Loadtest"))?;
        self.simulated_stop.store(false, Ordering::Release);

        tracing::info!(
            total_users = params.total_users,
            spawn_rate = params.spawn_rate,
            host = %params.host,
            "simulated load test started"
        );
        let worker = simulate(
            params,
            self.settings.tick,
            self.settings.steady_ticks,
            Arc::clone(&self.simulated_stop),
            self.broadcaster.clone(),
            slot,
        );
        Ok(self.runtime.spawn(worker))
    }

    /// Requests the simulation to stop at its next tick.
    pub fn stop_simulation(&self) {
        self.simulated_stop.store(true, Ordering::Release);
    }

    pub fn start_locust(&self, params: LoadTestParams) -> std::result::Result<StartedLocust, LoadTestError> {
        params
            .validate()
            .map_err(|e| LoadTestError::Validation(e.to_string()))?;
        let slot = Slot::acquire(&self.locust_active)
            .ok_or(LoadTestError::AlreadyRunning("Locust"))?;

        let locustfile = ensure_locustfile(&self.settings.locustfile).map_err(LoadTestError::Workspace)?;
        let run_id = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let out_dir = self.settings.reports_root.join(&run_id);
        ensure_dir(&out_dir).map_err(LoadTestError::Workspace)?;
        let csv_prefix = out_dir.join("stats");

        let spec = CommandSpec::new(self.settings.locust_program.clone()).args([
            "-f".to_string(),
            locustfile.display().to_string(),
            "--headless".to_string(),
            "-u".to_string(),
            params.total_users.to_string(),
            "-r".to_string(),
            params.spawn_rate.to_string(),
            "--host".to_string(),
            params.host.clone(),
            "--csv".to_string(),
            csv_prefix.display().to_string(),
        ]);

        let stop = Arc::new(Notify::new());
        *self.lock_stop() = Some(Arc::clone(&stop));

        tracing::info!(run_id = %run_id, host = %params.host, "locust run started");
        let runner = self.runner;
        let broadcaster = self.broadcaster.clone();
        let worker = self.runtime.spawn(async move {
            let _slot = slot;
            let mut sink = ChannelSink(broadcaster.clone());
            match runner.run(&spec, &mut sink, Some(&stop)).await {
                Ok(code) => {
                    broadcaster.publish(format!("[locust] finished with code {}", code));
                    tracing::info!(exit_code = code, "locust run finished");
                }
                Err(err) => {
                    broadcaster.publish(format!("[locust] error: {}", err));
                    tracing::error!(error = %err, "locust run failed to start");
                }
            }
        });

        Ok(StartedLocust {
            run_id,
            csv_prefix,
            worker,
        })
    }

    /// Kills the running Locust process. Returns false when none is running.
    pub fn stop_locust(&self) -> bool {
        if !self.is_locust_running() {
            return false;
        }
        match self.lock_stop().take() {
            Some(stop) => {
                stop.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn list_reports(&self) -> Result<Vec<RunDirEntry>> {
        list_run_dirs(&self.settings.reports_root)
    }

    /// `run_id` must already be checked against path traversal.
    pub async fn read_report(&self, run_id: &str) -> Result<LocustReport> {
        let run_dir = self.settings.reports_root.join(run_id);
        tokio::task::spawn_blocking(move || read_locust_report(&run_dir))
            .await
            .map_err(|e| AppError::Internal(format!("Report task failed: {e}")))?
    }

    fn lock_stop(&self) -> std::sync::MutexGuard<'_, Option<Arc<Notify>>> {
        self.locust_stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn simulate(
    params: LoadTestParams,
    tick: Duration,
    steady_ticks: u32,
    stop: Arc<AtomicBool>,
    broadcaster: LogBroadcaster,
    slot: Slot,
) {
    let _slot = slot;
    let stopped = || stop.load(Ordering::Acquire);
    let mut active = 0u32;

    while !stopped() {
        tokio::time::sleep(tick).await;
        active = params.total_users.min(active.saturating_add(params.spawn_rate));
        broadcaster.publish(format!(
            "[loadtest] host={} active_users={}/{}",
            params.host, active, params.total_users
        ));
        if active >= params.total_users {
            for _ in 0..steady_ticks {
                if stopped() {
                    break;
                }
                tokio::time::sleep(tick).await;
                broadcaster.publish(format!("[loadtest] steady active_users={}", active));
            }
            break;
        }
    }
    broadcaster.publish("[loadtest] stopped");
    tracing::info!(active_users = active, "simulated load test stopped");
}

fn ensure_locustfile(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        std::fs::write(path, DEFAULT_LOCUSTFILE).map_err(|e| {
            AppError::IoError(format!("Failed to write {}: {e}", path.display()))
        })?;
    }
    Ok(path.to_path_buf())
}

struct ChannelSink(LogBroadcaster);

#[async_trait]
impl LineSink for ChannelSink {
    async fn on_line(&mut self, line: &str) {
        self.0.publish(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::log_broadcaster::BroadcasterLimits;
    use tempfile::TempDir;

    fn service(tmp: &Path, locust_program: &str) -> LoadTestService {
        LoadTestService::new(
            Handle::current(),
            LogBroadcaster::new("loadtest", BroadcasterLimits::default()),
            LoadTestSettings {
                tick: Duration::from_millis(5),
                steady_ticks: 2,
                locust_program: locust_program.to_string(),
                locustfile: tmp.join("locustfile.py"),
                reports_root: tmp.join("locust-reports"),
            },
        )
    }

    fn params(total_users: u32, spawn_rate: u32) -> LoadTestParams {
        LoadTestParams {
            total_users,
            spawn_rate,
            host: "http://shop.test".to_string(),
        }
    }

    #[tokio::test]
    async fn simulation_ramps_holds_then_stops() {
        let tmp = TempDir::new().unwrap();
        let svc = service(tmp.path(), "locust");
        svc.start_simulation(params(4, 2)).unwrap().await.unwrap();

        assert_eq!(
            svc.broadcaster().snapshot(),
            vec![
                "[loadtest] host=http://shop.test active_users=2/4",
                "[loadtest] host=http://shop.test active_users=4/4",
                "[loadtest] steady active_users=4",
                "[loadtest] steady active_users=4",
                "[loadtest] stopped",
            ]
        );
        assert!(!svc.is_simulation_running());
    }

    #[tokio::test]
    async fn simulation_is_exclusive_and_stoppable() {
        let tmp = TempDir::new().unwrap();
        let svc = service(tmp.path(), "locust");
        let worker = svc.start_simulation(params(1_000_000, 1)).unwrap();

        let err = svc.start_simulation(params(10, 1)).unwrap_err();
        assert_eq!(err.status_code(), 409);

        svc.stop_simulation();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("simulation did not stop")
            .unwrap();
        assert_eq!(
            svc.broadcaster().snapshot().last().map(String::as_str),
            Some("[loadtest] stopped")
        );
        assert!(svc.start_simulation(params(1, 1)).is_ok());
    }

    #[tokio::test]
    async fn zero_spawn_rate_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let svc = service(tmp.path(), "locust");
        let err = svc.start_simulation(params(10, 0)).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(!svc.is_simulation_running());
    }

    #[tokio::test]
    async fn locust_run_streams_output_and_writes_default_locustfile() {
        let tmp = TempDir::new().unwrap();
        // `echo` stands in for locust and prints the arguments it was given.
        let svc = service(tmp.path(), "echo");
        let started = svc.start_locust(params(20, 4)).unwrap();
        started.worker.await.unwrap();

        assert!(tmp.path().join("locustfile.py").is_file());
        assert!(started.csv_prefix.parent().unwrap().is_dir());
        let lines = svc.broadcaster().snapshot();
        assert!(lines[0].contains("--headless -u 20 -r 4 --host http://shop.test --csv"));
        assert_eq!(lines.last().map(String::as_str), Some("[locust] finished with code 0"));

        let reports = svc.list_reports().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, started.run_id);
    }

    #[tokio::test]
    async fn locust_run_can_be_stopped() {
        let tmp = TempDir::new().unwrap();
        // `sh -f <file> ...` runs the locustfile itself as a shell script.
        std::fs::write(tmp.path().join("locustfile.py"), "echo swarm up\nexec sleep 30\n").unwrap();
        let svc = service(tmp.path(), "sh");
        let started = svc.start_locust(params(5, 1)).unwrap();

        assert!(matches!(
            svc.start_locust(params(5, 1)),
            Err(LoadTestError::AlreadyRunning(_))
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(svc.stop_locust());

        tokio::time::timeout(Duration::from_secs(10), started.worker)
            .await
            .expect("locust was not stopped")
            .unwrap();
        let lines = svc.broadcaster().snapshot();
        assert_eq!(lines.first().map(String::as_str), Some("swarm up"));
        assert!(lines.last().unwrap().starts_with("[locust] finished with code"));
        assert!(!svc.is_locust_running());
        assert!(!svc.stop_locust());
    }

    #[tokio::test]
    async fn report_reads_csv_from_run_dir() {
        let tmp = TempDir::new().unwrap();
        let svc = service(tmp.path(), "locust");
        let run_dir = tmp.path().join("locust-reports").join("20261015-101500");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("stats_stats.csv"), "Name,Request Count
/,42
").unwrap();

        let report = svc.read_report("20261015-101500").await.unwrap();
        assert_eq!(report.stats[0]["Request Count"], "42");
        assert!(report.failures.is_empty());

        assert!(matches!(
            svc.read_report("20261015-999999").await,
            Err(AppError::NotFound(_))
        ));
    }
}
