use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::error::{AppError, Result};
use crate::domain::suite::Suite;

pub const CONFIG_PATH_ENV: &str = "TESTDECK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "testdeck.toml";
const ENV_PREFIX: &str = "TESTDECK_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub data_dir: PathBuf,
    pub runner: RunnerConfig,
    pub report: ReportConfig,
    pub logs: LogsConfig,
    pub storage: StorageConfig,
    pub loadtest: LoadTestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            data_dir: PathBuf::from("./data"),
            runner: RunnerConfig::default(),
            report: ReportConfig::default(),
            logs: LogsConfig::default(),
            storage: StorageConfig::default(),
            loadtest: LoadTestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// A runner invocation. `args` may reference `{script}`, `{results_dir}` and
/// `{run_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    fn pytest(script: &str) -> Self {
        Self {
            program: "pytest".to_string(),
            args: vec![
                script.to_string(),
                "-q".to_string(),
                "--alluredir={results_dir}".to_string(),
            ],
        }
    }

    pub fn render_args(&self, script: &Path, results_dir: &Path, run_id: &str) -> Vec<String> {
        let script = script.display().to_string();
        let results_dir = results_dir.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{script}", &script)
                    .replace("{results_dir}", &results_dir)
                    .replace("{run_id}", run_id)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Working directory of every spawned runner.
    pub root_dir: PathBuf,
    /// Where the runner scripts live, relative to `root_dir` unless absolute.
    pub scripts_dir: PathBuf,
    pub web_elements_file: PathBuf,
    pub app_elements_file: PathBuf,
    pub web: CommandTemplate,
    pub api: CommandTemplate,
    pub app: CommandTemplate,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            scripts_dir: PathBuf::from("backend/app"),
            web_elements_file: PathBuf::from("data/web_elements.json"),
            app_elements_file: PathBuf::from("data/app_elements.json"),
            web: CommandTemplate::pytest("{script}"),
            api: CommandTemplate::pytest("{script}"),
            app: CommandTemplate::pytest("{script}"),
        }
    }
}

impl RunnerConfig {
    pub fn command(&self, suite: Suite) -> &CommandTemplate {
        match suite {
            Suite::Web => &self.web,
            Suite::Api => &self.api,
            Suite::App => &self.app,
        }
    }

    pub fn script_path(&self, suite: Suite) -> PathBuf {
        let file = match suite {
            Suite::Web => "web_test_runner.py",
            Suite::Api => "api_test_runner.py",
            Suite::App => "app_test_runner.py",
        };
        self.scripts_dir.join(file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub enabled: bool,
    pub program: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "allure".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    pub capacity: usize,
    pub replay: usize,
    pub subscriber_queue: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            replay: 200,
            subscriber_queue: 1024,
        }
    }
}

/// Collaborator files. Unset paths resolve under `data_dir`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub web_cases_path: Option<PathBuf>,
    pub app_cases_path: Option<PathBuf>,
    pub api_cases_path: Option<PathBuf>,
    pub bugs_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    pub tick_ms: u64,
    pub steady_ticks: u32,
    pub locust_program: String,
    /// Defaults to `<data_dir>/locustfile.py`, created on first use.
    pub locustfile: Option<PathBuf>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            steady_ticks: 5,
            locust_program: "locust".to_string(),
            locustfile: None,
        }
    }
}

impl AppConfig {
    pub fn cases_path(&self, suite: Suite) -> PathBuf {
        let (configured, file) = match suite {
            Suite::Web => (&self.storage.web_cases_path, "web_cases.json"),
            Suite::App => (&self.storage.app_cases_path, "app_cases.json"),
            Suite::Api => (&self.storage.api_cases_path, "api_cases.json"),
        };
        configured
            .clone()
            .unwrap_or_else(|| self.data_dir.join(file))
    }

    pub fn bugs_path(&self) -> PathBuf {
        self.storage
            .bugs_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("bugs.json"))
    }

    pub fn locustfile_path(&self) -> PathBuf {
        self.loadtest
            .locustfile
            .clone()
            .unwrap_or_else(|| self.data_dir.join("locustfile.py"))
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }

    fn validate(self) -> Result<Self> {
        if self.logs.capacity == 0 {
            return Err(AppError::ConfigError("logs.capacity must be positive".into()));
        }
        if self.logs.replay > self.logs.capacity {
            return Err(AppError::ConfigError(
                "logs.replay must not exceed logs.capacity".into(),
            ));
        }
        if self.loadtest.tick_ms == 0 {
            return Err(AppError::ConfigError("loadtest.tick_ms must be positive".into()));
        }
        for suite in Suite::ALL {
            if self.runner.command(suite).program.trim().is_empty() {
                return Err(AppError::ConfigError(format!(
                    "runner.{}.program must not be empty",
                    suite
                )));
            }
        }
        Ok(self)
    }
}

fn figment_for(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    match config_file {
        Some(path) => figment = figment.merge(Toml::file(path)),
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
            } else {
                tracing::debug!("no config file found; relying on defaults + env overrides");
            }
        }
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Defaults, then the TOML file, then `TESTDECK_*` environment overrides.
pub fn load() -> Result<AppConfig> {
    let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    load_from(explicit.as_deref())
}

pub fn load_from(config_file: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = config_file {
        if !path.exists() {
            return Err(AppError::ConfigError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
    }
    let config: AppConfig = figment_for(config_file)
        .extract()
        .map_err(|e| AppError::ConfigError(e.to_string()))?;
    config.validate()
}
