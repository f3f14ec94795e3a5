use serde::{Deserialize, Serialize};

/// Bug ticket filed automatically for a failed run. Once handed to the bug
/// storage its lifecycle belongs there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugTicket {
    pub title: String,
    pub description: String,
    pub repro: String,
    pub severity: String,
    pub status: String,
    pub note: String,
}

impl BugTicket {
    pub const DEFAULT_SEVERITY: &'static str = "medium";
    pub const DEFAULT_STATUS: &'static str = "new";
    pub const SYSTEM_NOTE: &'static str = "This bug was generated automatically by the system.";
}
