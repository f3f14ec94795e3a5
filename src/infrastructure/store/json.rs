//! File-backed collaborators. Each file maps a project id (as a string) to a
//! list of records: `{ "1": [ {...}, {...} ], "2": [...] }`. A file holding a
//! bare list predates project scoping and is read as project `"1"`.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinError;

use super::{BugSink, CaseSource};
use crate::domain::bug::BugTicket;
use crate::domain::case::CaseRecord;
use crate::domain::error::{AppError, Result};
use crate::domain::suite::Suite;
use crate::infrastructure::storage::atomic_write_bytes;

const LEGACY_PROJECT: &str = "1";

fn load_scoped(path: &Path) -> Result<Map<String, JsonValue>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => {
            return Err(AppError::StorageError(format!(
                "Failed to read {}: {err}",
                path.display()
            )))
        }
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    let data: JsonValue = serde_json::from_str(&raw).map_err(|e| {
        AppError::StorageError(format!("Failed to parse {}: {e}", path.display()))
    })?;
    Ok(match data {
        JsonValue::Object(map) => map,
        JsonValue::Array(items) => {
            let mut map = Map::new();
            map.insert(LEGACY_PROJECT.to_string(), JsonValue::Array(items));
            map
        }
        _ => Map::new(),
    })
}

fn save_scoped(path: &Path, data: &Map<String, JsonValue>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(data)?;
    atomic_write_bytes(path, &bytes)
}

fn join_err(err: JoinError) -> AppError {
    AppError::Internal(format!("Store task failed: {err}"))
}

fn project_items(data: &Map<String, JsonValue>, project_id: i64) -> Vec<JsonValue> {
    match data.get(&project_id.to_string()) {
        Some(JsonValue::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Per-suite case files.
#[derive(Debug, Clone)]
pub struct JsonCaseStore {
    web: PathBuf,
    app: PathBuf,
    api: PathBuf,
}

impl JsonCaseStore {
    pub fn new(web: PathBuf, app: PathBuf, api: PathBuf) -> Self {
        Self { web, app, api }
    }

    fn path_for(&self, suite: Suite) -> &Path {
        match suite {
            Suite::Web => &self.web,
            Suite::App => &self.app,
            Suite::Api => &self.api,
        }
    }
}

#[async_trait]
impl CaseSource for JsonCaseStore {
    async fn list_cases(&self, suite: Suite, project_id: i64) -> Result<Vec<CaseRecord>> {
        let path = self.path_for(suite).to_path_buf();
        let data = tokio::task::spawn_blocking(move || load_scoped(&path))
            .await
            .map_err(join_err)??;
        Ok(project_items(&data, project_id)
            .into_iter()
            .map(CaseRecord::from)
            .collect())
    }
}

/// Bugs file with per-project auto-increment ids. Clones share the lock.
#[derive(Debug, Clone)]
pub struct JsonBugStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl JsonBugStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, project_id: i64, ticket: &BugTicket) -> Result<i64> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut data = load_scoped(&self.path)?;
        let mut bugs = project_items(&data, project_id);
        let next_id = bugs
            .iter()
            .filter_map(|bug| bug.get("id").and_then(id_as_i64))
            .max()
            .unwrap_or(0)
            + 1;

        let mut record = match serde_json::to_value(ticket)? {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        record.insert("id".to_string(), JsonValue::from(next_id));
        record.insert("project_id".to_string(), JsonValue::from(project_id));
        bugs.push(JsonValue::Object(record));

        data.insert(project_id.to_string(), JsonValue::Array(bugs));
        save_scoped(&self.path, &data)?;
        Ok(next_id)
    }
}

fn id_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl BugSink for JsonBugStore {
    async fn create_bug(&self, project_id: i64, ticket: &BugTicket) -> Result<i64> {
        let store = self.clone();
        let ticket = ticket.clone();
        tokio::task::spawn_blocking(move || store.append(project_id, &ticket))
            .await
            .map_err(join_err)?
    }
}
