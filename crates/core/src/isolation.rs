use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetConfig, IsolationStrategy, TableIsolation, TenantId};

/// Outcome of statically analysing one candidate statement. The validator
/// never rewrites SQL; a failed validation is corrected only by regeneration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationValidation {
    pub passed: bool,
    pub violations: Vec<String>,
}

impl IsolationValidation {
    fn from_violations(violations: Vec<String>) -> Self {
        Self { passed: violations.is_empty(), violations }
    }
}

/// Static analysis of a candidate SQL statement enforcing tenant scoping.
///
/// Works on a token stream rather than substrings: table references and their
/// aliases are resolved first, then every isolation-scoped table is checked
/// for a predicate binding its tenant column (directly, or on the hierarchy
/// root reached through the configured join path) to the active tenant.
#[derive(Clone, Debug)]
pub struct ClientIsolationValidator {
    rules: Vec<TableIsolation>,
}

impl ClientIsolationValidator {
    pub fn for_dataset(dataset: &DatasetConfig) -> Self {
        Self { rules: dataset.isolation.clone() }
    }

    pub fn new(rules: Vec<TableIsolation>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, sql: &str, tenant: &TenantId) -> IsolationValidation {
        let tokens = lex(sql);
        if tokens.is_empty() {
            return IsolationValidation::from_violations(vec!["empty statement".to_string()]);
        }

        let mut violations = Vec::new();
        violations.extend(check_read_only(&tokens));

        let tables = table_references(&tokens);
        let predicates = equality_predicates(&tokens);

        // Any literal bound to a known tenant column must match the caller.
        let tenant_columns: Vec<&str> = self
            .rules
            .iter()
            .map(|rule| match &rule.strategy {
                IsolationStrategy::RowLevel { column } => column.as_str(),
                IsolationStrategy::HierarchyScoped { root_column, .. } => root_column.as_str(),
            })
            .collect();
        for predicate in &predicates {
            if tenant_columns.iter().any(|column| column.eq_ignore_ascii_case(&predicate.column))
                && !predicate.value.eq_ignore_ascii_case(tenant.as_str())
            {
                violations.push(format!(
                    "predicate binds `{}` to literal `{}` but the active tenant is `{}`",
                    predicate.column, predicate.value, tenant
                ));
            }
        }
        violations.extend(check_tenant_in_lists(&tokens, &tenant_columns));

        for rule in &self.rules {
            let Some(table) = tables.iter().find(|t| t.table == rule.table.to_ascii_lowercase())
            else {
                continue;
            };
            match &rule.strategy {
                IsolationStrategy::RowLevel { column } => {
                    if !has_binding(&predicates, table, column, tenant) {
                        violations.push(format!(
                            "table `{}` has no predicate binding `{column}` to tenant `{tenant}`",
                            rule.table
                        ));
                    }
                }
                IsolationStrategy::HierarchyScoped { root_table, root_column, join_path } => {
                    let mut chain = join_path.clone();
                    chain.push(root_table.clone());
                    for hop in &chain {
                        if !tables.iter().any(|t| t.table == hop.to_ascii_lowercase()) {
                            violations.push(format!(
                                "table `{}` is hierarchy-scoped through `{hop}`, which is not \
                                 joined in this statement",
                                rule.table
                            ));
                        }
                    }
                    let root = tables.iter().find(|t| t.table == root_table.to_ascii_lowercase());
                    let bound = root
                        .map(|root| has_binding(&predicates, root, root_column, tenant))
                        .unwrap_or(false);
                    if root.is_some() && !bound {
                        violations.push(format!(
                            "hierarchy root `{root_table}` has no predicate binding \
                             `{root_column}` to tenant `{tenant}`",
                        ));
                    }
                }
            }
        }

        IsolationValidation::from_violations(violations)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    /// Lowercased identifier or keyword.
    Ident(String),
    Number(String),
    /// Contents of a single-quoted literal, original case preserved.
    Str(String),
    Symbol(char),
}

fn lex(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i = (i + 2).min(chars.len());
        } else if c == '\'' {
            let mut literal = String::new();
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        literal.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                literal.push(chars[i]);
                i += 1;
            }
            tokens.push(Token::Str(literal));
        } else if c == '"' {
            let mut ident = String::new();
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                ident.push(chars[i].to_ascii_lowercase());
                i += 1;
            }
            i += 1;
            tokens.push(Token::Ident(ident));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                ident.push(chars[i].to_ascii_lowercase());
                i += 1;
            }
            tokens.push(Token::Ident(ident));
        } else if c.is_ascii_digit() {
            let mut number = String::new();
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                number.push(chars[i]);
                i += 1;
            }
            tokens.push(Token::Number(number));
        } else {
            tokens.push(Token::Symbol(c));
            i += 1;
        }
    }
    tokens
}

const WRITE_KEYWORDS: [&str; 12] = [
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "replace", "grant",
    "revoke", "attach", "pragma",
];

fn check_read_only(tokens: &[Token]) -> Vec<String> {
    let mut violations = Vec::new();
    match tokens.first() {
        Some(Token::Ident(first)) if first == "select" || first == "with" => {}
        _ => violations.push("statement must be a SELECT".to_string()),
    }
    for token in tokens {
        if let Token::Ident(ident) = token {
            if WRITE_KEYWORDS.contains(&ident.as_str()) {
                violations.push(format!(
                    "write or DDL keyword `{}` is not allowed",
                    ident.to_ascii_uppercase()
                ));
            }
        }
    }
    violations
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TableRef {
    table: String,
    aliases: Vec<String>,
}

const CLAUSE_KEYWORDS: [&str; 17] = [
    "on", "where", "group", "order", "having", "limit", "join", "inner", "left", "right", "full",
    "cross", "outer", "union", "using", "select", "as",
];

fn table_references(tokens: &[Token]) -> Vec<TableRef> {
    let mut tables: Vec<TableRef> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let is_source_keyword = matches!(&tokens[i], Token::Ident(k) if k == "from" || k == "join");
        if !is_source_keyword {
            i += 1;
            continue;
        }
        i += 1;
        loop {
            // Derived tables have no base name to scope; their inner query is
            // scanned by the same pass.
            if matches!(tokens.get(i), Some(Token::Symbol('('))) {
                break;
            }
            let Some(Token::Ident(mut name)) = tokens.get(i).cloned() else {
                break;
            };
            i += 1;
            // schema-qualified name: keep the last component
            while matches!(tokens.get(i), Some(Token::Symbol('.'))) {
                if let Some(Token::Ident(part)) = tokens.get(i + 1) {
                    name = part.clone();
                    i += 2;
                } else {
                    break;
                }
            }
            let mut aliases = vec![name.clone()];
            if matches!(tokens.get(i), Some(Token::Ident(k)) if k == "as") {
                i += 1;
            }
            if let Some(Token::Ident(alias)) = tokens.get(i) {
                if !CLAUSE_KEYWORDS.contains(&alias.as_str()) {
                    aliases.push(alias.clone());
                    i += 1;
                }
            }
            if let Some(existing) = tables.iter_mut().find(|t| t.table == name) {
                for alias in aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
            } else {
                tables.push(TableRef { table: name, aliases });
            }
            // comma-separated FROM list
            if matches!(tokens.get(i), Some(Token::Symbol(','))) {
                i += 1;
                continue;
            }
            break;
        }
    }
    tables
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Predicate {
    qualifier: Option<String>,
    column: String,
    value: String,
}

fn equality_predicates(tokens: &[Token]) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Some(Token::Ident(first)) = tokens.get(i) {
            let (qualifier, column, next) = if matches!(tokens.get(i + 1), Some(Token::Symbol('.')))
            {
                match tokens.get(i + 2) {
                    Some(Token::Ident(column)) => {
                        (Some(first.clone()), column.clone(), i + 3)
                    }
                    _ => {
                        i += 1;
                        continue;
                    }
                }
            } else {
                (None, first.clone(), i + 1)
            };
            if matches!(tokens.get(next), Some(Token::Symbol('='))) {
                match tokens.get(next + 1) {
                    Some(Token::Number(value)) => {
                        predicates.push(Predicate { qualifier, column, value: value.clone() });
                    }
                    Some(Token::Str(value)) => {
                        predicates.push(Predicate { qualifier, column, value: value.clone() });
                    }
                    _ => {}
                }
            }
            i = next;
        } else {
            i += 1;
        }
    }
    predicates
}

fn check_tenant_in_lists(tokens: &[Token], tenant_columns: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let Token::Ident(column) = token else { continue };
        if !tenant_columns.iter().any(|tenant| tenant.eq_ignore_ascii_case(column)) {
            continue;
        }
        if matches!(tokens.get(index + 1), Some(Token::Ident(k)) if k == "in") {
            violations.push(format!(
                "`{column} IN (...)` may span multiple tenants; a single equality predicate is \
                 required"
            ));
        }
    }
    violations
}

fn has_binding(
    predicates: &[Predicate],
    table: &TableRef,
    column: &str,
    tenant: &TenantId,
) -> bool {
    let column = column.to_ascii_lowercase();
    predicates.iter().any(|predicate| {
        predicate.column == column
            && predicate
                .qualifier
                .as_ref()
                .map(|qualifier| table.aliases.contains(qualifier))
                .unwrap_or(true)
            && predicate.value.eq_ignore_ascii_case(tenant.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::{ClientIsolationValidator, IsolationValidation};
    use crate::dataset::{IsolationStrategy, TableIsolation, TenantId};

    fn row_level_validator() -> ClientIsolationValidator {
        ClientIsolationValidator::new(vec![TableIsolation {
            table: "sales".to_string(),
            strategy: IsolationStrategy::RowLevel { column: "client_id".to_string() },
        }])
    }

    fn hierarchy_validator() -> ClientIsolationValidator {
        ClientIsolationValidator::new(vec![TableIsolation {
            table: "fact_shipments".to_string(),
            strategy: IsolationStrategy::HierarchyScoped {
                root_table: "corporations".to_string(),
                root_column: "corporation_id".to_string(),
                join_path: vec!["brands".to_string()],
            },
        }])
    }

    fn validate(validator: &ClientIsolationValidator, sql: &str) -> IsolationValidation {
        validator.validate(sql, &TenantId::new("5"))
    }

    #[test]
    fn select_with_direct_tenant_filter_passes() {
        let result = validate(&row_level_validator(), "SELECT * FROM sales WHERE client_id = 5");
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn aliased_join_with_qualified_filter_passes() {
        let sql = "SELECT p.product_name, SUM(s.revenue) FROM sales s \
                   JOIN products p ON s.product_id = p.product_id \
                   WHERE s.client_id = 5 GROUP BY p.product_name";
        let result = validate(&row_level_validator(), sql);
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn missing_tenant_filter_fails() {
        let result = validate(&row_level_validator(), "SELECT * FROM sales");
        assert!(!result.passed);
        assert!(result.violations[0].contains("client_id"));
    }

    #[test]
    fn wrong_tenant_literal_fails() {
        let result = validate(&row_level_validator(), "SELECT * FROM sales WHERE client_id = 3");
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| v.contains("literal `3`")));
    }

    #[test]
    fn in_list_over_tenant_column_fails() {
        let result =
            validate(&row_level_validator(), "SELECT * FROM sales WHERE client_id IN (1, 2, 5)");
        assert!(!result.passed);
    }

    #[test]
    fn write_statements_fail_even_with_tenant_filter() {
        for sql in [
            "DELETE FROM sales WHERE client_id = 5",
            "UPDATE sales SET revenue = 0 WHERE client_id = 5",
            "DROP TABLE sales",
        ] {
            let result = validate(&row_level_validator(), sql);
            assert!(!result.passed, "expected failure for {sql}");
        }
    }

    #[test]
    fn unscoped_tables_do_not_require_a_filter() {
        let result = validate(&row_level_validator(), "SELECT * FROM products WHERE price > 10");
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn string_tenant_ids_match_quoted_literals() {
        let validator = ClientIsolationValidator::new(vec![TableIsolation {
            table: "sales".to_string(),
            strategy: IsolationStrategy::RowLevel { column: "tenant".to_string() },
        }]);
        let result = validator
            .validate("SELECT * FROM sales WHERE tenant = 'acme'", &TenantId::new("acme"));
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn hierarchy_scoped_table_passes_through_join_chain() {
        let sql = "SELECT f.volume FROM fact_shipments f \
                   JOIN brands b ON f.brand_id = b.brand_id \
                   JOIN corporations c ON b.corporation_id = c.corporation_id \
                   WHERE c.corporation_id = 5";
        let result = validate(&hierarchy_validator(), sql);
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn hierarchy_scoped_table_without_join_chain_fails() {
        let result = validate(&hierarchy_validator(), "SELECT volume FROM fact_shipments");
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| v.contains("brands")));
        assert!(result.violations.iter().any(|v| v.contains("corporations")));
    }

    #[test]
    fn hierarchy_root_without_tenant_predicate_fails() {
        let sql = "SELECT f.volume FROM fact_shipments f \
                   JOIN brands b ON f.brand_id = b.brand_id \
                   JOIN corporations c ON b.corporation_id = c.corporation_id";
        let result = validate(&hierarchy_validator(), sql);
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| v.contains("corporation_id")));
    }

    #[test]
    fn empty_statement_fails() {
        let result = validate(&row_level_validator(), "   ");
        assert!(!result.passed);
    }

    #[test]
    fn comments_do_not_hide_keywords() {
        let result = validate(
            &row_level_validator(),
            "SELECT * FROM sales -- DROP TABLE sales\nWHERE client_id = 5",
        );
        assert!(result.passed, "violations: {:?}", result.violations);
    }
}
