use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::DEFAULT_CONTEXT_WINDOW;
use crate::dataset::{DatasetConfig, DatasetRegistry};
use crate::session::DEFAULT_RETAINED_TURNS;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
    pub datasets: Vec<DatasetConfig>,
    pub default_dataset: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    /// Hard cap on rows returned to the caller per statement.
    pub max_rows: usize,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Iteration budget for the generate/execute/validate/reflect loop.
    pub max_iterations: u32,
    /// Turns rendered into the prompt fragment; independent of retention.
    pub context_window: usize,
    /// Turns retained per session before FIFO eviction.
    pub session_retention: usize,
    pub generation_timeout_secs: u64,
    pub execution_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("could not read document `{path}` for dataset `{dataset}`: {source}")]
    ReadDatasetDoc { dataset: String, path: PathBuf, source: std::io::Error },
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://querydesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                max_rows: 500,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            agent: AgentConfig {
                max_iterations: 10,
                context_window: DEFAULT_CONTEXT_WINDOW,
                session_retention: DEFAULT_RETAINED_TURNS,
                generation_timeout_secs: 30,
                execution_timeout_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            datasets: Vec::new(),
            default_dataset: None,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the TOML file (if any), then
    /// `QUERYDESK_*` environment overrides. Dataset documents referenced by
    /// path are read once here and inlined; reload requires restart.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = options
            .config_path
            .or_else(|| env::var("QUERYDESK_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("querydesk.toml"));

        if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
            let file: FileConfig = toml::from_str(&raw)
                .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?;
            config.apply_file(file, path.parent().unwrap_or_else(|| Path::new(".")))?;
        } else if options.require_file {
            return Err(ConfigError::MissingConfigFile(path));
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn dataset_registry(&self) -> DatasetRegistry {
        DatasetRegistry::new(self.datasets.clone(), self.default_dataset.clone())
    }

    fn apply_file(&mut self, file: FileConfig, base_dir: &Path) -> Result<(), ConfigError> {
        if let Some(database) = file.database {
            apply_option(&mut self.database.url, database.url);
            apply_option(&mut self.database.max_connections, database.max_connections);
            apply_option(&mut self.database.timeout_secs, database.timeout_secs);
            apply_option(&mut self.database.max_rows, database.max_rows);
        }
        if let Some(llm) = file.llm {
            apply_option(&mut self.llm.provider, llm.provider);
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if llm.base_url.is_some() {
                self.llm.base_url = llm.base_url;
            }
            apply_option(&mut self.llm.model, llm.model);
            apply_option(&mut self.llm.timeout_secs, llm.timeout_secs);
        }
        if let Some(server) = file.server {
            apply_option(&mut self.server.bind_address, server.bind_address);
            apply_option(&mut self.server.port, server.port);
            apply_option(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }
        if let Some(agent) = file.agent {
            apply_option(&mut self.agent.max_iterations, agent.max_iterations);
            apply_option(&mut self.agent.context_window, agent.context_window);
            apply_option(&mut self.agent.session_retention, agent.session_retention);
            apply_option(&mut self.agent.generation_timeout_secs, agent.generation_timeout_secs);
            apply_option(&mut self.agent.execution_timeout_secs, agent.execution_timeout_secs);
        }
        if let Some(logging) = file.logging {
            apply_option(&mut self.logging.level, logging.level);
            apply_option(&mut self.logging.format, logging.format);
        }
        if file.default_dataset.is_some() {
            self.default_dataset = file.default_dataset;
        }
        for entry in file.datasets {
            self.datasets.push(entry.into_dataset(base_dir)?);
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("QUERYDESK_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(provider) = env::var("QUERYDESK_LLM_PROVIDER") {
            self.llm.provider = match provider.as_str() {
                "openai" | "open_ai" => LlmProvider::OpenAi,
                "anthropic" => LlmProvider::Anthropic,
                "ollama" => LlmProvider::Ollama,
                other => {
                    return Err(ConfigError::InvalidEnvOverride {
                        key: "QUERYDESK_LLM_PROVIDER".to_string(),
                        value: other.to_string(),
                    })
                }
            };
        }
        if let Ok(api_key) = env::var("QUERYDESK_LLM_API_KEY") {
            self.llm.api_key = Some(api_key.into());
        }
        if let Ok(model) = env::var("QUERYDESK_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(level) = env::var("QUERYDESK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(port) = env::var("QUERYDESK_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "QUERYDESK_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Validation("agent.max_iterations must be >= 1".to_string()));
        }
        if self.agent.context_window == 0 {
            return Err(ConfigError::Validation("agent.context_window must be >= 1".to_string()));
        }
        if self.server.graceful_shutdown_secs == 0 {
            return Err(ConfigError::Validation(
                "server.graceful_shutdown_secs must be >= 1".to_string(),
            ));
        }
        if let Some(default) = &self.default_dataset {
            if !self.datasets.iter().any(|dataset| &dataset.id == default) {
                return Err(ConfigError::Validation(format!(
                    "default_dataset `{default}` is not among the configured datasets"
                )));
            }
        }
        for dataset in &self.datasets {
            if dataset.schema_doc.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "dataset `{}` has an empty schema document",
                    dataset.id
                )));
            }
        }
        Ok(())
    }
}

fn apply_option<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    llm: Option<FileLlm>,
    server: Option<FileServer>,
    agent: Option<FileAgent>,
    logging: Option<FileLogging>,
    default_dataset: Option<String>,
    #[serde(default)]
    datasets: Vec<FileDataset>,
}

#[derive(Debug, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FileLlm {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileServer {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileAgent {
    max_iterations: Option<u32>,
    context_window: Option<usize>,
    session_retention: Option<usize>,
    generation_timeout_secs: Option<u64>,
    execution_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

/// Dataset entry as written in the config file. Schema and business-rule
/// documents may be inlined or referenced by path relative to the file.
#[derive(Debug, Deserialize)]
struct FileDataset {
    #[serde(flatten)]
    dataset: DatasetConfig,
    schema_path: Option<PathBuf>,
    rules_path: Option<PathBuf>,
}

impl FileDataset {
    fn into_dataset(self, base_dir: &Path) -> Result<DatasetConfig, ConfigError> {
        let mut dataset = self.dataset;
        if let Some(path) = self.schema_path {
            let full = base_dir.join(path);
            dataset.schema_doc = fs::read_to_string(&full).map_err(|source| {
                ConfigError::ReadDatasetDoc { dataset: dataset.id.clone(), path: full, source }
            })?;
        }
        if let Some(path) = self.rules_path {
            let full = base_dir.join(path);
            dataset.business_rules = fs::read_to_string(&full).map_err(|source| {
                ConfigError::ReadDatasetDoc { dataset: dataset.id.clone(), path: full, source }
            })?;
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{AppConfig, ConfigError, LlmProvider, LoadOptions};

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("querydesk.toml");
        let mut file = std::fs::File::create(&path).expect("create config");
        file.write_all(contents.as_bytes()).expect("write config");
        path
    }

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.context_window, 5);
        assert_eq!(config.agent.session_retention, 10);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
[llm]
provider = "open_ai"
model = "gpt-4o-mini"

[agent]
max_iterations = 4

[[datasets]]
id = "sales"
name = "Sales"
schema_doc = "CREATE TABLE sales (client_id INTEGER);"

[[datasets.isolation]]
table = "sales"
mode = "row_level"
column = "client_id"
"#,
        );

        let config = AppConfig::load(LoadOptions { config_path: Some(path), require_file: true })
            .expect("load config");
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.datasets.len(), 1);
        assert_eq!(config.datasets[0].isolation.len(), 1);
    }

    #[test]
    fn dataset_docs_load_from_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("schema.sql"), "CREATE TABLE sales (client_id INTEGER);")
            .expect("write schema");
        let path = write_config(
            &dir,
            r#"
[[datasets]]
id = "sales"
name = "Sales"
schema_doc = ""
schema_path = "schema.sql"
"#,
        );

        let config = AppConfig::load(LoadOptions { config_path: Some(path), require_file: true })
            .expect("load config");
        assert!(config.datasets[0].schema_doc.contains("CREATE TABLE sales"));
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            require_file: true,
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn zero_shutdown_grace_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "[server]\ngraceful_shutdown_secs = 0\n");
        let result = AppConfig::load(LoadOptions { config_path: Some(path), require_file: true });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_default_dataset_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "default_dataset = \"missing\"\n");
        let result = AppConfig::load(LoadOptions { config_path: Some(path), require_file: true });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
