use querydesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.push(render_line("database.url", &config.database.url));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
    ));
    lines.push(render_line("database.max_rows", &config.database.max_rows.to_string()));
    lines.push(render_line("llm.provider", &format!("{:?}", config.llm.provider)));
    lines.push(render_line("llm.model", &config.llm.model));
    lines.push(render_line(
        "llm.api_key",
        &config
            .llm
            .api_key
            .as_ref()
            .map(|key| redact_token(key.expose_secret()))
            .unwrap_or_else(|| "(unset)".to_string()),
    ));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("(provider default)"),
    ));
    lines.push(render_line(
        "server.bind",
        &format!("{}:{}", config.server.bind_address, config.server.port),
    ));
    lines.push(render_line("agent.max_iterations", &config.agent.max_iterations.to_string()));
    lines.push(render_line("agent.context_window", &config.agent.context_window.to_string()));
    lines.push(render_line(
        "agent.session_retention",
        &config.agent.session_retention.to_string(),
    ));
    lines.push(render_line("logging.level", &config.logging.level));
    lines.push(render_line("datasets", &config.datasets.len().to_string()));
    lines.push(render_line(
        "default_dataset",
        config.default_dataset.as_deref().unwrap_or("(first configured)"),
    ));

    lines.join("\n")
}

fn render_line(key: &str, value: &str) -> String {
    format!("  {key} = {value}")
}

fn redact_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
