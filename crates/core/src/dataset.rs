use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier for an isolated data owner. Rows belonging to one tenant
/// must never be visible to a query issued on behalf of another.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How tenant scoping is expressed for one table of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum IsolationStrategy {
    /// The table carries a tenant column and every statement touching it must
    /// bind that column to the active tenant directly.
    RowLevel { column: String },
    /// The tenant predicate lives on an ancestor table reached through a fixed
    /// join chain (e.g. brands -> corporations, filtered by corporation id).
    /// Every table named in `join_path` plus `root_table` must appear in the
    /// statement, and `root_column` on `root_table` must bind the tenant.
    HierarchyScoped { root_table: String, root_column: String, join_path: Vec<String> },
}

/// Per-table isolation rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIsolation {
    pub table: String,
    #[serde(flatten)]
    pub strategy: IsolationStrategy,
}

/// A business entity the analyst may reference by name ("AB InBev", "ABI").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Static description of one queryable dataset. Loaded once at startup;
/// schema and business-rule documents are immutable prompt inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// CREATE TABLE statements plus data-availability notes, fed verbatim to
    /// the generation capability.
    pub schema_doc: String,
    /// Free-form business rules (metric definitions, fiscal calendar, etc.).
    #[serde(default)]
    pub business_rules: String,
    #[serde(default)]
    pub fact_tables: Vec<String>,
    #[serde(default)]
    pub dimension_tables: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub isolation: Vec<TableIsolation>,
    #[serde(default)]
    pub entities: Vec<EntityAlias>,
    #[serde(default)]
    pub sample_questions: Vec<String>,
}

impl DatasetConfig {
    pub fn isolation_for(&self, table: &str) -> Option<&IsolationStrategy> {
        self.isolation
            .iter()
            .find(|rule| rule.table.eq_ignore_ascii_case(table))
            .map(|rule| &rule.strategy)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("unknown dataset `{id}`; available: {available:?}")]
    UnknownDataset { id: String, available: Vec<String> },
    #[error("no datasets configured")]
    Empty,
}

/// Keyed registry of datasets with a default, built once from configuration.
#[derive(Clone, Debug, Default)]
pub struct DatasetRegistry {
    datasets: BTreeMap<String, DatasetConfig>,
    default_id: Option<String>,
}

impl DatasetRegistry {
    pub fn new(datasets: Vec<DatasetConfig>, default_id: Option<String>) -> Self {
        let default_id = default_id.or_else(|| datasets.first().map(|d| d.id.clone()));
        let datasets = datasets.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self { datasets, default_id }
    }

    /// Resolve a dataset by id, falling back to the configured default.
    pub fn get(&self, dataset_id: Option<&str>) -> Result<&DatasetConfig, DatasetError> {
        let id = match dataset_id {
            Some(id) => id,
            None => self.default_id.as_deref().ok_or(DatasetError::Empty)?,
        };
        self.datasets.get(id).ok_or_else(|| DatasetError::UnknownDataset {
            id: id.to_string(),
            available: self.datasets.keys().cloned().collect(),
        })
    }

    pub fn list(&self) -> Vec<&DatasetConfig> {
        self.datasets.values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{DatasetConfig, DatasetError, DatasetRegistry, IsolationStrategy, TableIsolation};

    pub(crate) fn sales_dataset() -> DatasetConfig {
        DatasetConfig {
            id: "sales".to_string(),
            name: "Sales Transactions".to_string(),
            description: "Transaction-level sales data".to_string(),
            schema_doc: "CREATE TABLE sales (client_id INTEGER, revenue REAL);".to_string(),
            business_rules: String::new(),
            fact_tables: vec!["sales".to_string()],
            dimension_tables: vec!["products".to_string()],
            metrics: vec!["revenue".to_string()],
            isolation: vec![TableIsolation {
                table: "sales".to_string(),
                strategy: IsolationStrategy::RowLevel { column: "client_id".to_string() },
            }],
            entities: Vec::new(),
            sample_questions: Vec::new(),
        }
    }

    #[test]
    fn registry_resolves_default_and_named_datasets() {
        let registry = DatasetRegistry::new(vec![sales_dataset()], None);
        assert_eq!(registry.get(None).expect("default").id, "sales");
        assert_eq!(registry.get(Some("sales")).expect("named").id, "sales");
    }

    #[test]
    fn unknown_dataset_lists_available_ids() {
        let registry = DatasetRegistry::new(vec![sales_dataset()], None);
        let error = registry.get(Some("market_size")).unwrap_err();
        assert_eq!(
            error,
            DatasetError::UnknownDataset {
                id: "market_size".to_string(),
                available: vec!["sales".to_string()],
            }
        );
    }

    #[test]
    fn isolation_lookup_is_case_insensitive() {
        let dataset = sales_dataset();
        assert!(dataset.isolation_for("SALES").is_some());
        assert!(dataset.isolation_for("products").is_none());
    }
}
