use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A recorded test case. Cases are schemaless JSON objects owned by the case
/// storage; the orchestrator only reads their identifier fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseRecord(pub Map<String, JsonValue>);

impl CaseRecord {
    /// String form of the first populated identifier among `fields`.
    /// Missing fields, nulls and empty strings count as unpopulated.
    pub fn identifier(&self, fields: &[&str]) -> Option<String> {
        fields
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find_map(identifier_text)
    }
}

impl From<JsonValue> for CaseRecord {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => CaseRecord(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                CaseRecord(map)
            }
        }
    }
}

fn identifier_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
