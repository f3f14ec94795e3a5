//! Reads the CSV stats a headless Locust run leaves in its run directory.

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::domain::error::{AppError, Result};

/// Locust `--csv <dir>/stats` writes `stats_stats.csv`; older layouts used
/// the bare names.
const STATS_FILES: [&str; 2] = ["stats_stats.csv", "stats.csv"];
const FAILURE_FILES: [&str; 2] = ["stats_failures.csv", "failures.csv"];

pub type CsvRow = BTreeMap<String, String>;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LocustReport {
    pub stats: Vec<CsvRow>,
    pub failures: Vec<CsvRow>,
}

/// Missing CSV files yield empty lists; a missing run directory is NotFound.
pub fn read_locust_report(run_dir: &Path) -> Result<LocustReport> {
    if !run_dir.is_dir() {
        return Err(AppError::NotFound(format!(
            "Load test run {} not found",
            run_dir.display()
        )));
    }
    Ok(LocustReport {
        stats: read_first_existing(run_dir, &STATS_FILES)?,
        failures: read_first_existing(run_dir, &FAILURE_FILES)?,
    })
}

fn read_first_existing(run_dir: &Path, names: &[&str]) -> Result<Vec<CsvRow>> {
    match names.iter().map(|name| run_dir.join(name)).find(|p| p.is_file()) {
        Some(path) => {
            let content = fs::read_to_string(&path).map_err(|e| {
                AppError::IoError(format!("Failed to read {}: {e}", path.display()))
            })?;
            parse_rows(&content).map_err(|e| {
                AppError::StorageError(format!("{} in {}", e, path.display()))
            })
        }
        None => Ok(Vec::new()),
    }
}

fn parse_rows(content: &str) -> std::result::Result<Vec<CsvRow>, String> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| format!("Failed to read CSV headers: {e}"))?
        .clone();

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|e| format!("Failed to parse CSV row {}: {e}", index + 1))?;
        rows.push(to_row(&headers, &record));
    }
    Ok(rows)
}

fn to_row(headers: &StringRecord, record: &StringRecord) -> CsvRow {
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| (header.to_string(), record.get(idx).unwrap_or("").to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STATS: &str = "Type,Name,Request Count,Failure Count,Average Response Time\n\
GET,/,120,3,41.5\n\
,Aggregated,120,3,41.5\n";

    #[test]
    fn reads_stats_and_failures_keyed_by_header() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stats_stats.csv"), STATS).unwrap();
        fs::write(
            tmp.path().join("stats_failures.csv"),
            "Method,Name,Error,Occurrences\nGET,/,500 Server Error,3\n",
        )
        .unwrap();

        let report = read_locust_report(tmp.path()).unwrap();
        assert_eq!(report.stats.len(), 2);
        assert_eq!(report.stats[0]["Name"], "/");
        assert_eq!(report.stats[0]["Request Count"], "120");
        assert_eq!(report.stats[1]["Type"], "");
        assert_eq!(report.stats[1]["Name"], "Aggregated");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0]["Error"], "500 Server Error");
    }

    #[test]
    fn bare_file_names_and_missing_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stats.csv"), "Name,Request Count\n/cart, 7 \n/short\n").unwrap();

        let report = read_locust_report(tmp.path()).unwrap();
        assert_eq!(report.stats[0]["Request Count"], "7");
        assert_eq!(report.stats[1]["Request Count"], "");
        assert!(report.failures.is_empty());
    }

    #[test]
    fn missing_run_dir_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = read_locust_report(&tmp.path().join("20260101-000000")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
