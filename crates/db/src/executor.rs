use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row};
use tracing::debug;

use querydesk_core::execute::{ExecutionError, QueryExecutor, QueryResult};

use crate::connection::DbPool;

/// Read-only SQL execution against the analytical SQLite store.
///
/// Defense in depth: the pool already runs `PRAGMA query_only`, and the
/// isolation validator has approved the statement before it gets here, but
/// the executor still refuses anything that is not a SELECT.
pub struct SqliteQueryExecutor {
    pool: DbPool,
    max_rows: usize,
}

impl SqliteQueryExecutor {
    pub fn new(pool: DbPool, max_rows: usize) -> Self {
        Self { pool, max_rows: max_rows.max(1) }
    }
}

#[async_trait]
impl QueryExecutor for SqliteQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ExecutionError> {
        let head = sql.trim_start().to_ascii_lowercase();
        if !(head.starts_with("select") || head.starts_with("with")) {
            return Err(ExecutionError::Rejected(
                "only SELECT statements are executed".to_string(),
            ));
        }

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| ExecutionError::Failed(err.to_string()))?;

        let mut result = QueryResult::default();
        if let Some(first) = rows.first() {
            result.columns = first.columns().iter().map(|c| c.name().to_string()).collect();
        }
        for row in rows.iter().take(self.max_rows) {
            let mut record = serde_json::Map::new();
            for column in row.columns() {
                record.insert(column.name().to_string(), decode_value(row, column.ordinal()));
            }
            result.rows.push(record);
        }
        result.row_count = result.rows.len();
        debug!(event_name = "db.query_executed", rows = result.row_count, "statement executed");
        Ok(result)
    }
}

/// SQLite columns are dynamically typed, so decode by trying the concrete
/// types in order and fall back to null.
fn decode_value(row: &SqliteRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use querydesk_core::execute::{ExecutionError, QueryExecutor};

    use super::SqliteQueryExecutor;

    async fn seeded_pool() -> crate::DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::query("CREATE TABLE sales (client_id INTEGER, region TEXT, amount REAL)")
            .execute(&pool)
            .await
            .expect("create table");
        for (client, region, amount) in
            [(42, "North", 1200.0), (42, "South", 800.5), (7, "North", 9999.0)]
        {
            sqlx::query("INSERT INTO sales (client_id, region, amount) VALUES (?, ?, ?)")
                .bind(client)
                .bind(region)
                .bind(amount)
                .execute(&pool)
                .await
                .expect("insert row");
        }
        pool
    }

    #[tokio::test]
    async fn select_returns_typed_rows() {
        let executor = SqliteQueryExecutor::new(seeded_pool().await, 100);
        let result = executor
            .execute("SELECT region, amount FROM sales WHERE client_id = 42 ORDER BY amount")
            .await
            .expect("query runs");

        assert_eq!(result.columns, vec!["region", "amount"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["region"], "South");
        assert_eq!(result.rows[0]["amount"], 800.5);
        assert_eq!(result.rows[1]["region"], "North");
    }

    #[tokio::test]
    async fn non_select_statements_are_rejected() {
        let executor = SqliteQueryExecutor::new(seeded_pool().await, 100);
        let result = executor.execute("DELETE FROM sales").await;
        assert!(matches!(result, Err(ExecutionError::Rejected(_))));
    }

    #[tokio::test]
    async fn malformed_sql_surfaces_as_failure() {
        let executor = SqliteQueryExecutor::new(seeded_pool().await, 100);
        let result = executor.execute("SELECT nope FROM missing_table").await;
        assert!(matches!(result, Err(ExecutionError::Failed(_))));
    }

    #[tokio::test]
    async fn row_cap_truncates_results() {
        let executor = SqliteQueryExecutor::new(seeded_pool().await, 1);
        let result = executor.execute("SELECT * FROM sales").await.expect("query runs");
        assert_eq!(result.row_count, 1);
    }
}
