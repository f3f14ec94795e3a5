use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::case::CaseRecord;
use crate::domain::error::Result;
use crate::domain::suite::Suite;
use crate::infrastructure::store::CaseSource;

/// Resolves which recorded cases a run executes.
pub struct CaseSelector {
    source: Arc<dyn CaseSource>,
}

impl CaseSelector {
    pub fn new(source: Arc<dyn CaseSource>) -> Self {
        Self { source }
    }

    /// Cases of `project_id` in storage order, narrowed to `case_ids` when a
    /// non-empty id set is given. Unknown ids are dropped silently.
    pub async fn select(
        &self,
        suite: Suite,
        project_id: i64,
        case_ids: Option<&[String]>,
    ) -> Result<Vec<CaseRecord>> {
        let all_cases = self.source.list_cases(suite, project_id).await?;
        Ok(filter_cases(all_cases, suite.id_fields(), case_ids))
    }
}

/// An absent or empty id set selects everything; an empty selection never
/// means "run nothing".
pub fn filter_cases(
    cases: Vec<CaseRecord>,
    id_fields: &[&str],
    case_ids: Option<&[String]>,
) -> Vec<CaseRecord> {
    let wanted: HashSet<&str> = match case_ids {
        Some(ids) if !ids.is_empty() => ids.iter().map(|id| id.trim()).collect(),
        _ => return cases,
    };

    cases
        .into_iter()
        .filter(|case| {
            case.identifier(id_fields)
                .map(|id| wanted.contains(id.as_str()))
                .unwrap_or(false)
        })
        .collect()
}
