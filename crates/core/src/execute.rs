use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tabular result of a successfully executed statement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Short human-readable summary for session history ("12 rows: 4.1M (top)").
    pub fn summary(&self) -> String {
        if self.rows.is_empty() {
            return "0 rows".to_string();
        }
        let top = self
            .rows
            .first()
            .and_then(|row| {
                row.iter()
                    .find(|(key, _)| {
                        let key = key.to_ascii_lowercase();
                        key != "id" && !key.ends_with("_id")
                    })
                    .map(|(_, value)| value.clone())
            })
            .map(format_value);
        match top {
            Some(top) => format!("{} rows: {top} (top)", self.row_count),
            None => format!("{} rows", self.row_count),
        }
    }
}

fn format_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Number(number) => {
            let as_float = number.as_f64().unwrap_or(0.0);
            if as_float.abs() >= 1_000_000.0 {
                format!("{:.1}M", as_float / 1_000_000.0)
            } else if as_float.abs() >= 1_000.0 {
                format!("{:.1}K", as_float / 1_000.0)
            } else {
                number.to_string()
            }
        }
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("execution timed out after {0}s")]
    Timeout(u64),
    #[error("statement rejected: {0}")]
    Rejected(String),
    #[error("execution failed: {0}")]
    Failed(String),
}

/// External execution capability. Implementations run one read-only statement
/// and return rows; all retry policy lives in the orchestrator.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ExecutionError>;
}
