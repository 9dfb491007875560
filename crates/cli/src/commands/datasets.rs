use querydesk_core::config::{AppConfig, LoadOptions};
use querydesk_core::dataset::IsolationStrategy;

use super::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure(format!("config load failed: {error}"), 2),
    };
    if config.datasets.is_empty() {
        return CommandResult::success("no datasets configured");
    }

    let mut lines = Vec::new();
    for dataset in &config.datasets {
        lines.push(format!("{} - {}", dataset.id, dataset.name));
        if !dataset.fact_tables.is_empty() {
            lines.push(format!("  fact tables: {}", dataset.fact_tables.join(", ")));
        }
        for rule in &dataset.isolation {
            match &rule.strategy {
                IsolationStrategy::RowLevel { column } => {
                    lines.push(format!("  isolation: {} via {}.{column}", "row_level", rule.table));
                }
                IsolationStrategy::HierarchyScoped { root_table, root_column, join_path } => {
                    lines.push(format!(
                        "  isolation: hierarchy_scoped {} -> {} ({}.{root_column})",
                        rule.table,
                        join_path.join(" -> "),
                        root_table,
                    ));
                }
            }
        }
    }
    CommandResult::success(lines.join("\n"))
}
