use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use querydesk_core::clarify::ClarificationDetector;
use querydesk_core::config::AgentConfig;
use querydesk_core::context::ContextBuilder;
use querydesk_core::dataset::{DatasetConfig, DatasetError, DatasetRegistry, TenantId};
use querydesk_core::execute::{ExecutionError, QueryExecutor, QueryResult};
use querydesk_core::filters::{self, FilterExtractor};
use querydesk_core::isolation::ClientIsolationValidator;
use querydesk_core::session::{SessionStore, Turn};

use crate::llm::{GenerationError, LlmClient};
use crate::planner::{transition, AgentState, PlanEvent, PlanState, PlanTransitionError};
use crate::prompts;

#[derive(Clone, Debug, Deserialize)]
pub struct QueryRequest {
    pub session_id: String,
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub dataset: Option<String>,
    /// Optional per-request iteration budget, capped by the configured one.
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub needs_clarification: bool,
    pub questions: Vec<String>,
    pub resolved_query: String,
    pub sql: Option<String>,
    pub results: Option<QueryResult>,
    pub explanation: Option<String>,
    pub iterations: u32,
    pub is_followup: bool,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Plan(#[from] PlanTransitionError),
}

/// Drives one request through clarify, context resolution, and the bounded
/// generate/execute/validate/reflect loop. All external calls (model,
/// database) happen under a timeout; a timeout is just another recoverable
/// step failure until the iteration budget runs out.
pub struct Orchestrator {
    registry: DatasetRegistry,
    sessions: Arc<SessionStore>,
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn QueryExecutor>,
    config: AgentConfig,
    detector: ClarificationDetector,
    context_builder: ContextBuilder,
}

impl Orchestrator {
    pub fn new(
        registry: DatasetRegistry,
        sessions: Arc<SessionStore>,
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn QueryExecutor>,
        config: AgentConfig,
    ) -> Self {
        let context_builder = ContextBuilder::new(config.context_window);
        Self {
            registry,
            sessions,
            llm,
            executor,
            config,
            detector: ClarificationDetector::new(),
            context_builder,
        }
    }

    pub fn datasets(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub async fn clear_session(&self, session_id: &str) {
        self.sessions.clear(session_id).await;
        info!(event_name = "session.cleared", session_id, "session cleared");
    }

    pub async fn handle_query(
        &self,
        request: QueryRequest,
    ) -> Result<QueryResponse, OrchestratorError> {
        let dataset = self.registry.get(request.dataset.as_deref())?;
        let tenant = TenantId::new(request.tenant_id.as_str());

        let snapshot =
            self.sessions.begin(&request.session_id, self.config.context_window).await;
        let fragment = self.context_builder.build(&snapshot.recent_turns);

        let mut plan = PlanState::Start;

        let classification = self.detector.classify(&request.query, &fragment);
        if classification.ambiguous {
            plan = transition(plan, PlanEvent::AmbiguityDetected)?;
            debug_assert_eq!(plan, PlanState::Clarifying);
            info!(
                event_name = "query.clarification_needed",
                session_id = %request.session_id,
                questions = classification.questions.len(),
                "ambiguous query, asking for clarification"
            );
            // Clarification consumes no loop budget and writes no turn.
            return Ok(QueryResponse {
                success: false,
                needs_clarification: true,
                questions: classification.questions,
                resolved_query: request.query.clone(),
                sql: None,
                results: None,
                explanation: None,
                iterations: 0,
                is_followup: false,
                error: None,
            });
        }
        plan = transition(plan, PlanEvent::QueryResolvable)?;

        // Context resolution: classify follow-up, merge inherited filters,
        // render the standalone resolved query.
        let has_history = !snapshot.recent_turns.is_empty();
        let followup = filters::is_followup(&request.query, has_history)
            || (has_history && filters::has_override_language(&request.query));
        let current = FilterExtractor::for_dataset(dataset).extract(&request.query);
        let inherited = snapshot
            .recent_turns
            .last()
            .map(|turn| turn.extracted_filters.clone())
            .unwrap_or_default();
        let resolved = filters::resolve_filters(&inherited, &current, followup);
        let resolved_query = filters::render_resolved_query(&request.query, &resolved);
        plan = transition(plan, PlanEvent::ContextResolved)?;

        let validator = ClientIsolationValidator::for_dataset(dataset);
        let budget = request
            .max_iterations
            .map(|requested| requested.clamp(1, self.config.max_iterations))
            .unwrap_or(self.config.max_iterations);
        let mut state = AgentState::new(budget);
        let mut last_error: Option<String> = None;

        let result = loop {
            // Generating
            state.iteration += 1;
            let sql = match self.generate_sql(dataset, &tenant, &resolved_query, &fragment, &state)
                .await
            {
                Ok(sql) => {
                    state.candidate_sql = Some(sql.clone());
                    plan = transition(plan, PlanEvent::SqlProposed)?;
                    sql
                }
                Err(err) => {
                    warn!(
                        event_name = "query.generation_failed",
                        session_id = %request.session_id,
                        iteration = state.iteration,
                        error = %err,
                        "generation attempt failed"
                    );
                    plan = transition(plan, PlanEvent::GenerationFailed)?;
                    last_error = Some(err.to_string());
                    state.reflection_notes.push(format!("generation failed: {err}"));
                    if state.budget_exhausted() {
                        plan = transition(plan, PlanEvent::BudgetExhausted)?;
                        break None;
                    }
                    plan = transition(plan, PlanEvent::RetryBudgetAvailable)?;
                    continue;
                }
            };

            // Executing. The isolation check gates real execution: a
            // statement that fails it is never sent to the database.
            let validation = validator.validate(&sql, &tenant);
            let execution: Result<QueryResult, ExecutionError> = if validation.passed {
                match timeout(
                    Duration::from_secs(self.config.execution_timeout_secs),
                    self.executor.execute(&sql),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ExecutionError::Timeout(self.config.execution_timeout_secs)),
                }
            } else {
                Err(ExecutionError::Rejected(
                    "blocked before execution: tenant isolation check failed".to_string(),
                ))
            };
            plan = transition(plan, PlanEvent::ExecutionFinished)?;

            // Validating
            match (validation.passed, execution) {
                (true, Ok(result)) => {
                    state.validation = Some(validation);
                    state.execution = Some(Ok(result.clone()));
                    plan = transition(plan, PlanEvent::ValidationPassed)?;
                    break Some(result);
                }
                (passed, execution) => {
                    let mut notes = Vec::new();
                    if !passed {
                        for violation in &validation.violations {
                            notes.push(format!("tenant isolation violation: {violation}"));
                        }
                        last_error = Some(validation.violations.join("; "));
                    } else if let Err(err) = &execution {
                        notes.push(format!("execution failed: {err}"));
                        last_error = Some(err.to_string());
                    }
                    state.validation = Some(validation);
                    state.execution = Some(execution);

                    if state.budget_exhausted() {
                        plan = transition(plan, PlanEvent::BudgetExhausted)?;
                        break None;
                    }
                    // Reflecting: fold the failure into corrective
                    // instruction for the next attempt.
                    plan = transition(plan, PlanEvent::ValidationFailed)?;
                    state.reflection_notes.extend(notes);
                    plan = transition(plan, PlanEvent::RetryBudgetAvailable)?;
                }
            }
        };

        match result {
            Some(result) => {
                debug_assert_eq!(plan, PlanState::Complete);
                self.finish_complete(
                    &request,
                    resolved_query,
                    resolved,
                    followup,
                    snapshot.generation,
                    state,
                    result,
                )
                .await
            }
            None => {
                debug_assert_eq!(plan, PlanState::Failed);
                self.finish_failed(
                    &request,
                    resolved_query,
                    resolved,
                    followup,
                    snapshot.generation,
                    state,
                    last_error,
                )
                .await
            }
        }
    }

    async fn generate_sql(
        &self,
        dataset: &DatasetConfig,
        tenant: &TenantId,
        resolved_query: &str,
        fragment: &str,
        state: &AgentState,
    ) -> Result<String, GenerationError> {
        let prompt = prompts::generation_prompt(
            dataset,
            tenant,
            resolved_query,
            fragment,
            &state.reflection_notes,
        );
        let completion = match timeout(
            Duration::from_secs(self.config.generation_timeout_secs),
            self.llm.complete(&prompt),
        )
        .await
        {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(GenerationError::Timeout(self.config.generation_timeout_secs))
            }
        };
        let sql = prompts::extract_sql(&completion);
        if sql.is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }
        Ok(sql)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_complete(
        &self,
        request: &QueryRequest,
        resolved_query: String,
        resolved_filters: BTreeMap<String, String>,
        followup: bool,
        generation: u64,
        state: AgentState,
        result: QueryResult,
    ) -> Result<QueryResponse, OrchestratorError> {
        let explanation = self.explain(&resolved_query, &result).await;

        let turn = Turn {
            raw_query: request.query.clone(),
            resolved_query: resolved_query.clone(),
            extracted_filters: resolved_filters,
            resolved_sql: state.candidate_sql.clone(),
            row_count: Some(result.row_count),
            success: true,
            is_followup: followup,
            timestamp: Utc::now(),
        };
        if !self.sessions.commit_turn(&request.session_id, generation, turn).await {
            info!(
                event_name = "session.turn_dropped",
                session_id = %request.session_id,
                "session cleared mid-request, turn discarded"
            );
        }

        info!(
            event_name = "query.completed",
            session_id = %request.session_id,
            iterations = state.iteration,
            rows = result.row_count,
            "query resolved"
        );
        Ok(QueryResponse {
            success: true,
            needs_clarification: false,
            questions: Vec::new(),
            resolved_query,
            sql: state.candidate_sql,
            results: Some(result),
            explanation: Some(explanation),
            iterations: state.iteration,
            is_followup: followup,
            error: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_failed(
        &self,
        request: &QueryRequest,
        resolved_query: String,
        resolved_filters: BTreeMap<String, String>,
        followup: bool,
        generation: u64,
        state: AgentState,
        last_error: Option<String>,
    ) -> Result<QueryResponse, OrchestratorError> {
        // A statement still violating isolation at the budget fails closed:
        // no rows and no SQL ever reach the caller.
        let fail_closed = state.isolation_violated();
        let error = if fail_closed {
            format!(
                "tenant isolation could not be satisfied: {}",
                state.last_violations().join("; ")
            )
        } else {
            last_error.unwrap_or_else(|| "iteration budget exhausted".to_string())
        };

        let turn = Turn {
            raw_query: request.query.clone(),
            resolved_query: resolved_query.clone(),
            extracted_filters: resolved_filters,
            resolved_sql: None,
            row_count: None,
            success: false,
            is_followup: followup,
            timestamp: Utc::now(),
        };
        if !self.sessions.commit_turn(&request.session_id, generation, turn).await {
            info!(
                event_name = "session.turn_dropped",
                session_id = %request.session_id,
                "session cleared mid-request, turn discarded"
            );
        }

        warn!(
            event_name = "query.failed",
            session_id = %request.session_id,
            iterations = state.iteration,
            fail_closed,
            error = %error,
            "query failed after exhausting iteration budget"
        );
        Ok(QueryResponse {
            success: false,
            needs_clarification: false,
            questions: Vec::new(),
            resolved_query,
            sql: if fail_closed { None } else { state.candidate_sql },
            results: None,
            explanation: None,
            iterations: state.iteration,
            is_followup: followup,
            error: Some(error),
        })
    }

    async fn explain(&self, resolved_query: &str, result: &QueryResult) -> String {
        let prompt = prompts::explanation_prompt(resolved_query, result);
        match timeout(
            Duration::from_secs(self.config.generation_timeout_secs),
            self.llm.complete(&prompt),
        )
        .await
        {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            _ => format!("Found {} result(s) for your query.", result.row_count),
        }
    }
}
