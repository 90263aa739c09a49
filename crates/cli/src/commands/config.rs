use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use toml::Value;
use underwrite_core::config::{AppConfig, LoadOptions};

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value) in effective_values(&config) {
        let source = field_source(
            key_path,
            &env_key(key_path),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("llm.provider", config.llm.provider.as_str().to_string()),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        ("llm.temperature", config.llm.temperature.to_string()),
        ("llm.top_p", config.llm.top_p.to_string()),
        ("scoring.mode", config.scoring.mode.as_str().to_string()),
        (
            "scoring.base_url",
            config.scoring.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("scoring.api_key", redact_secret(config.scoring.api_key.as_ref())),
        ("scoring.risk_endpoint", config.scoring.risk_endpoint.clone()),
        ("scoring.premium_endpoint", config.scoring.premium_endpoint.clone()),
        ("scoring.timeout_secs", config.scoring.timeout_secs.to_string()),
        ("agent.max_steps", config.agent.max_steps.to_string()),
        ("agent.tool_timeout_secs", config.agent.tool_timeout_secs.to_string()),
        ("agent.memory_top_k", config.agent.memory_top_k.to_string()),
        ("agent.invocation_ttl_secs", config.agent.invocation_ttl_secs.to_string()),
        ("agent.enforce_intent_guard", config.agent.enforce_intent_guard.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

/// `llm.api_key` is overridden by `UNDERWRITE_LLM_API_KEY`.
fn env_key(key_path: &str) -> String {
    format!("UNDERWRITE_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("underwrite.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/underwrite.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
