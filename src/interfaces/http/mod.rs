use actix_cors::Cors;
use actix_files::Files;
use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};

use crate::application::use_cases::load_test::LoadTestParams;
use crate::domain::error::{AppError, LoadTestError, RunError};
use crate::domain::run::{MobileTarget, RunRequest};
use crate::domain::suite::Suite;
use crate::infrastructure::bootstrap::AppState;
use crate::infrastructure::storage::list_run_dirs;

pub mod live;

use live::LiveLogBody;

static RUN_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

const DEFAULT_PROJECT_ID: i64 = 1;

const REPORT_MOUNT: &str = "/allure/report";

fn detail(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "detail": message.into() }))
}

fn status_from(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Body of `POST /runs/trigger-{suite}`. Every field is optional so the
/// handler, not the extractor, decides what is missing.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerPayload {
    #[serde(default)]
    pub project_id: Option<JsonValue>,
    #[serde(default)]
    pub case_ids: Option<Vec<JsonValue>>,
    #[serde(default)]
    pub app_file_name: Option<String>,
    #[serde(default)]
    pub platform_name: Option<String>,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
}

impl TriggerPayload {
    pub fn into_request(self, suite: Suite) -> Result<RunRequest, RunError> {
        let project_id = parse_project_id(self.project_id.as_ref())?;
        let mut request = RunRequest::new(suite, project_id);

        if let Some(ids) = self.case_ids {
            let usable: Vec<String> = ids.iter().filter_map(case_id_text).collect();
            if usable.is_empty() && !ids.is_empty() {
                return Err(RunError::Validation(
                    "case_ids must contain strings or integers".to_string(),
                ));
            }
            request = request.with_case_ids(usable);
        }

        if suite == Suite::App {
            if let Some(app_file_name) = self.app_file_name {
                let mut target = MobileTarget::new(app_file_name.trim());
                if let Some(name) = non_blank(self.platform_name) {
                    target.platform_name = name;
                }
                if let Some(version) = non_blank(self.platform_version) {
                    target.platform_version = version;
                }
                if let Some(device) = non_blank(self.device_name) {
                    target.device_name = device;
                }
                request = request.with_mobile(target);
            }
        }
        Ok(request)
    }
}

/// Missing, null and 0 all mean the default project.
fn parse_project_id(value: Option<&JsonValue>) -> Result<i64, RunError> {
    let parsed = match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) if s.trim().is_empty() => None,
        Some(JsonValue::String(s)) => Some(s.trim().parse::<i64>().map_err(|_| {
            RunError::Validation(format!("project_id must be an integer, got '{}'", s))
        })?),
        Some(other) => {
            return Err(RunError::Validation(format!(
                "project_id must be an integer, got {}",
                other
            )))
        }
    };
    Ok(match parsed {
        Some(id) if id != 0 => id,
        _ => DEFAULT_PROJECT_ID,
    })
}

fn case_id_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// An empty body means all defaults. Anything else must be a valid payload.
fn parse_trigger_body(body: &[u8]) -> Result<TriggerPayload, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerPayload::default());
    }
    serde_json::from_slice(body).map_err(|e| format!("Invalid request body: {e}"))
}

#[derive(Serialize)]
struct TriggerResponse {
    ok: bool,
    message: String,
    run_id: String,
    results_dir: PathBuf,
    report_dir: PathBuf,
    log_dir: PathBuf,
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[post("/runs/trigger-{suite}")]
async fn trigger_run(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let suite: Suite = match path.into_inner().parse() {
        Ok(suite) => suite,
        Err(msg) => return detail(StatusCode::NOT_FOUND, msg),
    };
    let payload = match parse_trigger_body(&body) {
        Ok(payload) => payload,
        Err(msg) => return detail(StatusCode::BAD_REQUEST, msg),
    };

    let request = match payload.into_request(suite) {
        Ok(request) => request,
        Err(err) => return detail(status_from(err.status_code()), err.to_string()),
    };

    match data.orchestrator.trigger(request).await {
        Ok(started) => {
            let handle = started.handle;
            HttpResponse::Ok().json(TriggerResponse {
                ok: true,
                message: format!("{} test started", suite.as_str()),
                run_id: handle.run_id,
                results_dir: handle.results_dir,
                report_dir: handle.report_dir,
                log_dir: handle.log_dir,
            })
        }
        Err(err) => detail(status_from(err.status_code()), err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    50
}

#[get("/runs")]
async fn run_list(data: web::Data<AppState>, query: web::Query<RecentQuery>) -> impl Responder {
    let runs = data.orchestrator.registry().recent(query.limit);
    HttpResponse::Ok().json(json!({ "runs": runs }))
}

#[get("/runs/status")]
async fn run_status(data: web::Data<AppState>) -> impl Responder {
    let orchestrator = &data.orchestrator;
    HttpResponse::Ok().json(json!({
        "web": orchestrator.is_running(Suite::Web),
        "app": orchestrator.is_running(Suite::App),
        "api": orchestrator.is_running(Suite::Api),
        "loadtest": data.load_tests.is_simulation_running(),
        "locust": data.load_tests.is_locust_running(),
    }))
}

#[get("/runs/{run_id}")]
async fn run_record(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let run_id = path.into_inner();
    match data.orchestrator.registry().get(&run_id) {
        Some(record) => HttpResponse::Ok().json(record),
        None => detail(StatusCode::NOT_FOUND, "Run not found"),
    }
}

#[get("/logs/{run_id}")]
async fn run_log(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let run_id = path.into_inner();
    if !RUN_ID_PATTERN.is_match(&run_id) {
        return detail(StatusCode::BAD_REQUEST, "Invalid run_id format");
    }

    let log_file = data.layout.log_file(&run_id);
    match tokio::fs::read(&log_file).await {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            detail(StatusCode::NOT_FOUND, "Log file not found")
        }
        Err(err) => {
            tracing::error!(run_id = %run_id, error = %err, "Failed to read run log");
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read log: {err}"))
        }
    }
}

fn report_url(run_id: &str) -> String {
    format!("{REPORT_MOUNT}/{run_id}/index.html")
}

#[get("/allure/list")]
async fn report_list(data: web::Data<AppState>) -> impl Responder {
    match list_run_dirs(data.layout.report_root()) {
        Ok(reports) => {
            let reports: Vec<JsonValue> = reports
                .into_iter()
                .map(|r| json!({ "name": r.name, "path": report_url(&r.name) }))
                .collect();
            HttpResponse::Ok().json(json!({ "reports": reports }))
        }
        Err(err) => detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RunIdQuery {
    run_id: String,
}

/// Regenerates the HTML report of one finished run.
#[post("/allure/generate")]
async fn report_generate(data: web::Data<AppState>, query: web::Query<RunIdQuery>) -> impl Responder {
    let run_id = query.into_inner().run_id;
    if !RUN_ID_PATTERN.is_match(&run_id) {
        return detail(StatusCode::BAD_REQUEST, "Invalid run_id format");
    }
    let Some(reports) = data.orchestrator.reports() else {
        return detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Allure command not found. Please install Allure CLI.",
        );
    };

    let results_dir = data.layout.results_dir(&run_id);
    if !results_dir.is_dir() {
        return detail(StatusCode::NOT_FOUND, "Results not found");
    }
    let report_dir = data.layout.report_dir(&run_id);
    match reports.generate(&results_dir, &report_dir).await {
        Ok(()) => {
            tracing::info!(run_id = %run_id, "report regenerated");
            HttpResponse::Ok().json(json!({
                "ok": true,
                "report_dir": report_dir.display().to_string(),
                "url": report_url(&run_id),
            }))
        }
        Err(err) => {
            tracing::warn!(run_id = %run_id, error = %err, "report regeneration failed");
            detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Allure generate failed: {err}"),
            )
        }
    }
}

#[get("/allure/results")]
async fn results_list(data: web::Data<AppState>) -> impl Responder {
    let root = data.layout.results_root();
    match list_run_dirs(root) {
        Ok(runs) => HttpResponse::Ok().json(json!({
            "dir": root.display().to_string(),
            "runs": runs,
        })),
        Err(err) => detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn load_test_error(err: LoadTestError) -> HttpResponse {
    detail(status_from(err.status_code()), err.to_string())
}

#[post("/loadtest/start")]
async fn loadtest_start(
    data: web::Data<AppState>,
    params: web::Query<LoadTestParams>,
) -> impl Responder {
    match data.load_tests.start_simulation(params.into_inner()) {
        Ok(_worker) => HttpResponse::Ok().json(json!({ "ok": true, "message": "loadtest started" })),
        Err(err) => load_test_error(err),
    }
}

#[post("/loadtest/stop")]
async fn loadtest_stop(data: web::Data<AppState>) -> impl Responder {
    data.load_tests.stop_simulation();
    HttpResponse::Ok().json(json!({ "ok": true, "message": "loadtest stopping" }))
}

#[post("/loadtest/start-real")]
async fn loadtest_start_real(
    data: web::Data<AppState>,
    params: web::Query<LoadTestParams>,
) -> impl Responder {
    match data.load_tests.start_locust(params.into_inner()) {
        Ok(started) => HttpResponse::Ok().json(json!({
            "ok": true,
            "message": "locust started",
            "run_id": started.run_id,
            "csv_prefix": started.csv_prefix.display().to_string(),
        })),
        Err(err) => load_test_error(err),
    }
}

#[post("/loadtest/stop-real")]
async fn loadtest_stop_real(data: web::Data<AppState>) -> impl Responder {
    let message = if data.load_tests.stop_locust() {
        "locust stopping"
    } else {
        "locust not running"
    };
    HttpResponse::Ok().json(json!({ "ok": true, "message": message }))
}

#[get("/loadtest/reports")]
async fn loadtest_reports(data: web::Data<AppState>) -> impl Responder {
    match data.load_tests.list_reports() {
        Ok(runs) => {
            let runs: Vec<JsonValue> = runs.into_iter().map(|r| json!({ "id": r.name })).collect();
            HttpResponse::Ok().json(json!({ "runs": runs }))
        }
        Err(err) => detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[get("/loadtest/report/{run_id}")]
async fn loadtest_report(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let run_id = path.into_inner();
    if !RUN_ID_PATTERN.is_match(&run_id) {
        return detail(StatusCode::BAD_REQUEST, "Invalid run_id format");
    }
    match data.load_tests.read_report(&run_id).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(AppError::NotFound(_)) => detail(StatusCode::NOT_FOUND, "Load test run not found"),
        Err(err) => {
            tracing::error!(run_id = %run_id, error = %err, "Failed to read load test report");
            detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn live_response(body: LiveLogBody) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .body(body)
}

#[get("/live/test-run")]
async fn live_test_run(data: web::Data<AppState>) -> impl Responder {
    live_response(LiveLogBody::new(data.orchestrator.broadcaster().subscribe()))
}

#[get("/live/loadtest")]
async fn live_loadtest(data: web::Data<AppState>) -> impl Responder {
    live_response(LiveLogBody::new(data.load_tests.broadcaster().subscribe()))
}

/// Route table, shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(trigger_run)
        .service(run_list)
        .service(run_status)
        .service(run_record)
        .service(run_log)
        .service(report_list)
        .service(report_generate)
        .service(results_list)
        .service(loadtest_start)
        .service(loadtest_stop)
        .service(loadtest_start_real)
        .service(loadtest_stop_real)
        .service(loadtest_reports)
        .service(loadtest_report)
        .service(live_test_run)
        .service(live_loadtest);
}

/// Generated HTML reports, served as static files.
pub fn report_files(report_root: &Path) -> Files {
    Files::new(REPORT_MOUNT, report_root).index_file("index.html")
}

pub fn start_server(state: web::Data<AppState>) -> std::io::Result<Server> {
    let (host, port) = state.config.bind_address();

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
            .service(report_files(state.layout.report_root()))
    })
    .bind((host.as_str(), port))?
    .run();

    tracing::info!(host = %host, port, "HTTP server listening");
    Ok(server)
}
