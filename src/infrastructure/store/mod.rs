use async_trait::async_trait;

use crate::domain::bug::BugTicket;
use crate::domain::case::CaseRecord;
use crate::domain::error::Result;
use crate::domain::suite::Suite;

pub mod json;

pub use json::{JsonBugStore, JsonCaseStore};

/// Read side of the case storage, as far as runs are concerned.
#[async_trait]
pub trait CaseSource: Send + Sync {
    /// Every case of `project_id` for `suite`, in storage order.
    async fn list_cases(&self, suite: Suite, project_id: i64) -> Result<Vec<CaseRecord>>;
}

/// Write side of the bug storage. Returns the id assigned to the new ticket.
#[async_trait]
pub trait BugSink: Send + Sync {
    async fn create_bug(&self, project_id: i64, ticket: &BugTicket) -> Result<i64>;
}
