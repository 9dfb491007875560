pub mod clarify;
pub mod config;
pub mod context;
pub mod dataset;
pub mod execute;
pub mod filters;
pub mod isolation;
pub mod session;

pub use clarify::{Classification, ClarificationDetector};
pub use config::{
    AgentConfig, AppConfig, ConfigError, DatabaseConfig, LlmConfig, LlmProvider, LoadOptions,
    LogFormat, LoggingConfig, ServerConfig,
};
pub use context::{ContextBuilder, DEFAULT_CONTEXT_WINDOW};
pub use dataset::{
    DatasetConfig, DatasetError, DatasetRegistry, EntityAlias, IsolationStrategy, TableIsolation,
    TenantId,
};
pub use execute::{ExecutionError, QueryExecutor, QueryResult};
pub use filters::{
    has_override_language, is_followup, render_resolved_query, resolve_filters, FilterExtractor,
};
pub use isolation::{ClientIsolationValidator, IsolationValidation};
pub use session::{SessionSnapshot, SessionStore, Turn, DEFAULT_RETAINED_TURNS};
