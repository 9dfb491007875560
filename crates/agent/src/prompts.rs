use std::fmt::Write as _;

use querydesk_core::dataset::{DatasetConfig, IsolationStrategy, TenantId};
use querydesk_core::execute::QueryResult;

/// Assemble the SQL-generation prompt. The resolved query (with inherited
/// filter context already rendered inline) is the question; tenant-scoping
/// rules are spelled out explicitly so a compliant statement is the model's
/// path of least resistance, with the validator as the real enforcement.
pub fn generation_prompt(
    dataset: &DatasetConfig,
    tenant: &TenantId,
    resolved_query: &str,
    context_fragment: &str,
    reflection_notes: &[String],
) -> String {
    let mut prompt = String::from(
        "You are a SQL analyst. Write a single read-only SQLite SELECT statement \
         answering the question below. Return only SQL, no prose.\n\n",
    );

    let _ = writeln!(prompt, "## Schema\n{}", dataset.schema_doc.trim());
    if !dataset.business_rules.trim().is_empty() {
        let _ = writeln!(prompt, "\n## Business rules\n{}", dataset.business_rules.trim());
    }

    prompt.push_str("\n## Tenant scoping (mandatory)\n");
    for rule in &dataset.isolation {
        match &rule.strategy {
            IsolationStrategy::RowLevel { column } => {
                let _ = writeln!(
                    prompt,
                    "- Any query touching `{}` must include `{column} = {tenant}`.",
                    rule.table
                );
            }
            IsolationStrategy::HierarchyScoped { root_table, root_column, join_path } => {
                let _ = writeln!(
                    prompt,
                    "- Any query touching `{}` must join through {} to `{root_table}` and \
                     include `{root_column} = {tenant}`.",
                    rule.table,
                    join_path.join(", "),
                );
            }
        }
    }

    if !context_fragment.is_empty() {
        let _ = writeln!(prompt, "\n## Conversation context\n{}", context_fragment.trim_end());
    }
    if !reflection_notes.is_empty() {
        prompt.push_str("\n## Corrections from previous attempts\n");
        for note in reflection_notes {
            let _ = writeln!(prompt, "- {note}");
        }
    }

    let _ = write!(prompt, "\n## Question\n{resolved_query}\n");
    prompt
}

/// Prompt for the closing narrative once a validated result exists. Row data
/// is summarized, not dumped, so the model never restates raw tenant rows.
pub fn explanation_prompt(resolved_query: &str, result: &QueryResult) -> String {
    format!(
        "In one or two sentences, explain this query result to a business analyst.\n\
         Question: {resolved_query}\n\
         Result summary: {}\n\
         Columns: {}\n",
        result.summary(),
        result.columns.join(", "),
    )
}

/// Strip markdown fences and surrounding prose from a model completion,
/// leaving the bare statement.
pub fn extract_sql(completion: &str) -> String {
    let trimmed = completion.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("sql").or_else(|| after.strip_prefix("SQL")).unwrap_or(after);
        let end = after.find("```").unwrap_or(after.len());
        return after[..end].trim().to_string();
    }
    trimmed.to_string()
}
