use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use querydesk_agent::{Orchestrator, OrchestratorError, QueryRequest, QueryResponse};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClearSessionRequest {
    pub session_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatasetSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub sample_questions: Vec<String>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/query", post(submit_query))
        .route("/api/session/clear", post(clear_session))
        .route("/api/datasets", get(list_datasets))
        .with_state(ApiState { orchestrator })
}

async fn submit_query(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ApiError>)> {
    match state.orchestrator.handle_query(request).await {
        Ok(response) => Ok(Json(response)),
        Err(OrchestratorError::Dataset(err)) => {
            Err((StatusCode::BAD_REQUEST, Json(ApiError { error: err.to_string() })))
        }
        Err(err) => {
            error!(event_name = "api.query_error", error = %err, "query handling failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: err.to_string() })))
        }
    }
}

async fn clear_session(
    State(state): State<ApiState>,
    Json(request): Json<ClearSessionRequest>,
) -> StatusCode {
    state.orchestrator.clear_session(&request.session_id).await;
    StatusCode::NO_CONTENT
}

async fn list_datasets(State(state): State<ApiState>) -> Json<Vec<DatasetSummary>> {
    let datasets = state
        .orchestrator
        .datasets()
        .list()
        .into_iter()
        .map(|dataset| DatasetSummary {
            id: dataset.id.clone(),
            name: dataset.name.clone(),
            description: dataset.description.clone(),
            sample_questions: dataset.sample_questions.clone(),
        })
        .collect();
    Json(datasets)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::Json;

    use querydesk_agent::{GenerationError, LlmClient, Orchestrator, QueryRequest};
    use querydesk_core::config::AgentConfig;
    use querydesk_core::dataset::{
        DatasetConfig, DatasetRegistry, IsolationStrategy, TableIsolation,
    };
    use querydesk_core::execute::{ExecutionError, QueryExecutor, QueryResult};
    use querydesk_core::session::SessionStore;

    use super::{clear_session, list_datasets, submit_query, ApiState, ClearSessionRequest};

    struct StaticLlm {
        completion: String,
    }

    #[async_trait]
    impl LlmClient for StaticLlm {
        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            if prompt.contains("explain this query result") {
                return Ok("One row matched.".to_string());
            }
            Ok(self.completion.clone())
        }
    }

    struct OneRowExecutor;

    #[async_trait]
    impl QueryExecutor for OneRowExecutor {
        async fn execute(&self, _sql: &str) -> Result<QueryResult, ExecutionError> {
            let mut row = serde_json::Map::new();
            row.insert("total".to_string(), serde_json::json!(1200));
            Ok(QueryResult {
                columns: vec!["total".to_string()],
                rows: vec![row],
                row_count: 1,
            })
        }
    }

    fn state() -> ApiState {
        let dataset = DatasetConfig {
            id: "sales".to_string(),
            name: "Sales".to_string(),
            description: "Retail sales facts".to_string(),
            schema_doc: "CREATE TABLE sales (client_id INTEGER, amount REAL);".to_string(),
            business_rules: String::new(),
            fact_tables: vec!["sales".to_string()],
            dimension_tables: Vec::new(),
            metrics: Vec::new(),
            isolation: vec![TableIsolation {
                table: "sales".to_string(),
                strategy: IsolationStrategy::RowLevel { column: "client_id".to_string() },
            }],
            entities: Vec::new(),
            sample_questions: vec!["Show revenue for 2023".to_string()],
        };
        let registry = DatasetRegistry::new(vec![dataset], Some("sales".to_string()));
        let orchestrator = Orchestrator::new(
            registry,
            Arc::new(SessionStore::default()),
            Arc::new(StaticLlm {
                completion: "SELECT SUM(amount) AS total FROM sales WHERE client_id = 42"
                    .to_string(),
            }),
            Arc::new(OneRowExecutor),
            AgentConfig {
                max_iterations: 3,
                context_window: 5,
                session_retention: 10,
                generation_timeout_secs: 5,
                execution_timeout_secs: 5,
            },
        );
        ApiState { orchestrator: Arc::new(orchestrator) }
    }

    fn request(dataset: Option<&str>) -> QueryRequest {
        QueryRequest {
            session_id: "s1".to_string(),
            query: "Show revenue for 2023".to_string(),
            tenant_id: "42".to_string(),
            dataset: dataset.map(str::to_string),
            max_iterations: None,
        }
    }

    #[tokio::test]
    async fn query_endpoint_returns_resolved_response() {
        let response = submit_query(State(state()), Json(request(None)))
            .await
            .expect("query succeeds");
        assert!(response.0.success);
        assert_eq!(response.0.results.as_ref().map(|r| r.row_count), Some(1));
        assert_eq!(response.0.explanation.as_deref(), Some("One row matched."));
    }

    #[tokio::test]
    async fn unknown_dataset_maps_to_bad_request() {
        let result = submit_query(State(state()), Json(request(Some("finance")))).await;
        let (status, body) = result.expect_err("unknown dataset fails");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.0.error.contains("finance"));
    }

    #[tokio::test]
    async fn clear_endpoint_returns_no_content() {
        let status = clear_session(
            State(state()),
            Json(ClearSessionRequest { session_id: "s1".to_string() }),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn datasets_endpoint_lists_configured_datasets() {
        let datasets = list_datasets(State(state())).await;
        assert_eq!(datasets.0.len(), 1);
        assert_eq!(datasets.0[0].id, "sales");
        assert_eq!(datasets.0[0].sample_questions.len(), 1);
    }
}
