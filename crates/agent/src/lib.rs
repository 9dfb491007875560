//! Agentic query resolution - the planning loop behind querydesk
//!
//! This crate turns a natural-language analytics question into a validated,
//! tenant-scoped SQL result:
//! - Decides whether a question is answerable or needs clarification
//! - Resolves follow-up questions against prior conversation turns
//! - Drives the bounded generate/execute/validate/reflect loop
//! - Narrates the final result for the analyst
//!
//! # Architecture
//!
//! One request moves through a fixed state graph (`planner`):
//! 1. **Clarify or resolve** - ambiguous questions stop before any SQL
//! 2. **Context resolution** - inherit filters from recent turns
//! 3. **Generate → Execute → Validate → Reflect** - at most
//!    `max_iterations` generation attempts, then terminate
//!
//! # Safety Principle
//!
//! The model is strictly a translator. It proposes SQL text; whether that SQL
//! runs, and whether its result is ever returned, is decided by the
//! deterministic isolation validator. A statement that fails the tenant check
//! is never executed, and a request that cannot satisfy the check within the
//! iteration budget fails closed with no rows and no SQL.

pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod prompts;

pub use llm::{GenerationError, HttpLlmClient, LlmClient};
pub use orchestrator::{Orchestrator, OrchestratorError, QueryRequest, QueryResponse};
pub use planner::{transition, AgentState, PlanEvent, PlanState, PlanTransitionError};
