use querydesk_core::execute::{ExecutionError, QueryResult};
use querydesk_core::isolation::IsolationValidation;
use thiserror::Error;

/// Planning-loop states. `Generating` is the only state reached more than
/// once, and every path back to it increments the iteration counter, which
/// bounds the loop by `max_iterations`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanState {
    Start,
    Clarifying,
    ContextResolution,
    Generating,
    Executing,
    Validating,
    Reflecting,
    Complete,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanEvent {
    AmbiguityDetected,
    QueryResolvable,
    ContextResolved,
    SqlProposed,
    GenerationFailed,
    ExecutionFinished,
    ValidationPassed,
    ValidationFailed,
    RetryBudgetAvailable,
    BudgetExhausted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanTransitionError {
    #[error("invalid transition from {state:?} on {event:?}")]
    InvalidTransition { state: PlanState, event: PlanEvent },
}

/// Pure transition function for the planning loop. Policy (when to retry,
/// what counts as a violation) lives with the caller; this only encodes the
/// legal state graph.
pub fn transition(current: PlanState, event: PlanEvent) -> Result<PlanState, PlanTransitionError> {
    use PlanEvent::{
        AmbiguityDetected, BudgetExhausted, ContextResolved, ExecutionFinished, GenerationFailed,
        QueryResolvable, RetryBudgetAvailable, SqlProposed, ValidationFailed, ValidationPassed,
    };
    use PlanState::{
        Clarifying, Complete, ContextResolution, Executing, Failed, Generating, Reflecting, Start,
        Validating,
    };

    let next = match (current, event) {
        (Start, AmbiguityDetected) => Clarifying,
        (Start, QueryResolvable) => ContextResolution,
        (ContextResolution, ContextResolved) => Generating,
        (Generating, SqlProposed) => Executing,
        (Generating, GenerationFailed) => Reflecting,
        (Executing, ExecutionFinished) => Validating,
        (Validating, ValidationPassed) => Complete,
        (Validating, ValidationFailed) => Reflecting,
        (Validating, BudgetExhausted) => Failed,
        (Reflecting, RetryBudgetAvailable) => Generating,
        (Reflecting, BudgetExhausted) => Failed,
        (state, event) => return Err(PlanTransitionError::InvalidTransition { state, event }),
    };
    Ok(next)
}

/// Per-invocation loop state. Created at loop entry, mutated once per
/// iteration, folded into a `Turn` at loop exit, never persisted.
#[derive(Debug)]
pub struct AgentState {
    pub iteration: u32,
    pub max_iterations: u32,
    pub candidate_sql: Option<String>,
    pub execution: Option<Result<QueryResult, ExecutionError>>,
    pub validation: Option<IsolationValidation>,
    pub reflection_notes: Vec<String>,
}

impl AgentState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            candidate_sql: None,
            execution: None,
            validation: None,
            reflection_notes: Vec::new(),
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Violations from the last validation pass, empty when validation never
    /// ran or passed.
    pub fn last_violations(&self) -> &[String] {
        self.validation.as_ref().map(|v| v.violations.as_slice()).unwrap_or(&[])
    }

    pub fn isolation_violated(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| !v.passed)
    }
}
