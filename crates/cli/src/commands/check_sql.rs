use querydesk_core::config::{AppConfig, LoadOptions};
use querydesk_core::dataset::{DatasetRegistry, TenantId};
use querydesk_core::isolation::ClientIsolationValidator;

use super::CommandResult;

/// Offline isolation check for a candidate statement. Never contacts the
/// database; useful for vetting hand-written report SQL before deployment.
pub fn run(dataset_id: Option<&str>, tenant: &str, sql: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure(format!("config load failed: {error}"), 2),
    };
    check(&config.dataset_registry(), dataset_id, tenant, sql)
}

fn check(
    registry: &DatasetRegistry,
    dataset_id: Option<&str>,
    tenant: &str,
    sql: &str,
) -> CommandResult {
    let dataset = match registry.get(dataset_id) {
        Ok(dataset) => dataset,
        Err(error) => return CommandResult::failure(error.to_string(), 2),
    };

    let validation = ClientIsolationValidator::for_dataset(dataset)
        .validate(sql, &TenantId::new(tenant));
    if validation.passed {
        return CommandResult::success(format!("ok: statement is scoped to tenant {tenant}"));
    }

    let mut lines = vec!["isolation check failed:".to_string()];
    for violation in &validation.violations {
        lines.push(format!("  - {violation}"));
    }
    CommandResult::failure(lines.join("\n"), 1)
}

#[cfg(test)]
mod tests {
    use querydesk_core::dataset::{
        DatasetConfig, DatasetRegistry, IsolationStrategy, TableIsolation,
    };

    use super::check;

    fn registry() -> DatasetRegistry {
        let dataset = DatasetConfig {
            id: "sales".to_string(),
            name: "Sales".to_string(),
            description: String::new(),
            schema_doc: "CREATE TABLE sales (client_id INTEGER);".to_string(),
            business_rules: String::new(),
            fact_tables: vec!["sales".to_string()],
            dimension_tables: Vec::new(),
            metrics: Vec::new(),
            isolation: vec![TableIsolation {
                table: "sales".to_string(),
                strategy: IsolationStrategy::RowLevel { column: "client_id".to_string() },
            }],
            entities: Vec::new(),
            sample_questions: Vec::new(),
        };
        DatasetRegistry::new(vec![dataset], Some("sales".to_string()))
    }

    #[test]
    fn scoped_statement_passes() {
        let result =
            check(&registry(), None, "42", "SELECT * FROM sales WHERE client_id = 42");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn unscoped_statement_fails_with_violations() {
        let result = check(&registry(), None, "42", "SELECT * FROM sales");
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("isolation check failed"));
    }

    #[test]
    fn unknown_dataset_is_a_usage_error() {
        let result = check(&registry(), Some("finance"), "42", "SELECT 1");
        assert_eq!(result.exit_code, 2);
    }
}
