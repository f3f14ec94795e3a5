use chrono::Local;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::domain::run::{RunHandle, RunOutcome, RunRecord, RunStatus};

pub const DEFAULT_REGISTRY_CAPACITY: usize = 200;

#[derive(Default)]
struct Records {
    by_id: HashMap<String, RunRecord>,
    order: VecDeque<String>,
}

/// Status of recent runs, oldest evicted first.
pub struct RunRegistry {
    capacity: usize,
    records: Mutex<Records>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(Records::default()),
        }
    }

    pub fn record_started(&self, handle: &RunHandle) {
        let record = RunRecord {
            run_id: handle.run_id.clone(),
            suite: handle.suite,
            project_id: handle.project_id,
            status: RunStatus::Running,
            started_at: Local::now().to_rfc3339(),
            finished_at: None,
            bug_id: None,
            report_generated: false,
        };

        let mut records = self.lock();
        if records.order.len() >= self.capacity {
            if let Some(evicted) = records.order.pop_front() {
                records.by_id.remove(&evicted);
            }
        }
        records.order.push_back(record.run_id.clone());
        records.by_id.insert(record.run_id.clone(), record);
    }

    pub fn record_finished(&self, outcome: &RunOutcome) {
        let mut records = self.lock();
        if let Some(record) = records.by_id.get_mut(&outcome.run_id) {
            record.status = RunStatus::from(&outcome.verdict);
            record.finished_at = Some(Local::now().to_rfc3339());
            record.bug_id = outcome.bug_id;
            record.report_generated = outcome.report_generated;
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.lock().by_id.get(run_id).cloned()
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<RunRecord> {
        let records = self.lock();
        records
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| records.by_id.get(id).cloned())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
