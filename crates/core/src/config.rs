use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub scoring: ScoringConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Clone, Debug)]
pub struct ScoringConfig {
    pub mode: ScoringMode,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub risk_endpoint: String,
    pub premium_endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Upper bound on tool invocations within one orchestration call.
    pub max_steps: u32,
    pub tool_timeout_secs: u64,
    pub memory_top_k: usize,
    pub invocation_ttl_secs: u64,
    pub enforce_intent_guard: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Remote,
    Heuristic,
}

impl ScoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Heuristic => "heuristic",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub scoring_mode: Option<ScoringMode>,
    pub max_steps: Option<u32>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_RISK_ENDPOINT: &str = "fraud-detection-xgb-v1-endpoint";
pub const DEFAULT_PREMIUM_ENDPOINT: &str = "claim-amount-linear-v2-endpoint";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://underwrite.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
                temperature: 0.5,
                top_p: 0.95,
            },
            scoring: ScoringConfig {
                mode: ScoringMode::Heuristic,
                base_url: None,
                api_key: None,
                risk_endpoint: DEFAULT_RISK_ENDPOINT.to_string(),
                premium_endpoint: DEFAULT_PREMIUM_ENDPOINT.to_string(),
                timeout_secs: 20,
            },
            agent: AgentConfig {
                max_steps: 8,
                tool_timeout_secs: 20,
                memory_top_k: 3,
                invocation_ttl_secs: 300,
                enforce_intent_guard: true,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for ScoringMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "heuristic" => Ok(Self::Heuristic),
            other => Err(ConfigError::Validation(format!(
                "unsupported scoring mode `{other}` (expected remote|heuristic)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("underwrite.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(top_p) = llm.top_p {
                self.llm.top_p = top_p;
            }
        }

        if let Some(scoring) = patch.scoring {
            if let Some(mode) = scoring.mode {
                self.scoring.mode = mode;
            }
            if let Some(base_url) = scoring.base_url {
                self.scoring.base_url = Some(base_url);
            }
            if let Some(scoring_api_key_value) = scoring.api_key {
                self.scoring.api_key = Some(secret_value(scoring_api_key_value));
            }
            if let Some(risk_endpoint) = scoring.risk_endpoint {
                self.scoring.risk_endpoint = risk_endpoint;
            }
            if let Some(premium_endpoint) = scoring.premium_endpoint {
                self.scoring.premium_endpoint = premium_endpoint;
            }
            if let Some(timeout_secs) = scoring.timeout_secs {
                self.scoring.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_steps) = agent.max_steps {
                self.agent.max_steps = max_steps;
            }
            if let Some(tool_timeout_secs) = agent.tool_timeout_secs {
                self.agent.tool_timeout_secs = tool_timeout_secs;
            }
            if let Some(memory_top_k) = agent.memory_top_k {
                self.agent.memory_top_k = memory_top_k;
            }
            if let Some(invocation_ttl_secs) = agent.invocation_ttl_secs {
                self.agent.invocation_ttl_secs = invocation_ttl_secs;
            }
            if let Some(enforce_intent_guard) = agent.enforce_intent_guard {
                self.agent.enforce_intent_guard = enforce_intent_guard;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("UNDERWRITE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("UNDERWRITE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_value("UNDERWRITE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_value("UNDERWRITE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("UNDERWRITE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("UNDERWRITE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_value("UNDERWRITE_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("UNDERWRITE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_LLM_TOP_P") {
            self.llm.top_p = parse_value("UNDERWRITE_LLM_TOP_P", &value)?;
        }

        if let Some(value) = read_env("UNDERWRITE_SCORING_MODE") {
            self.scoring.mode = value.parse()?;
        }
        if let Some(value) = read_env("UNDERWRITE_SCORING_BASE_URL") {
            self.scoring.base_url = Some(value);
        }
        if let Some(value) = read_env("UNDERWRITE_SCORING_API_KEY") {
            self.scoring.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("UNDERWRITE_SCORING_RISK_ENDPOINT") {
            self.scoring.risk_endpoint = value;
        }
        if let Some(value) = read_env("UNDERWRITE_SCORING_PREMIUM_ENDPOINT") {
            self.scoring.premium_endpoint = value;
        }
        if let Some(value) = read_env("UNDERWRITE_SCORING_TIMEOUT_SECS") {
            self.scoring.timeout_secs = parse_value("UNDERWRITE_SCORING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("UNDERWRITE_AGENT_MAX_STEPS") {
            self.agent.max_steps = parse_value("UNDERWRITE_AGENT_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_AGENT_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs =
                parse_value("UNDERWRITE_AGENT_TOOL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_AGENT_MEMORY_TOP_K") {
            self.agent.memory_top_k = parse_value("UNDERWRITE_AGENT_MEMORY_TOP_K", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_AGENT_INVOCATION_TTL_SECS") {
            self.agent.invocation_ttl_secs =
                parse_value("UNDERWRITE_AGENT_INVOCATION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_AGENT_ENFORCE_INTENT_GUARD") {
            self.agent.enforce_intent_guard =
                parse_value("UNDERWRITE_AGENT_ENFORCE_INTENT_GUARD", &value)?;
        }

        if let Some(value) = read_env("UNDERWRITE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("UNDERWRITE_SERVER_PORT") {
            self.server.port = parse_value("UNDERWRITE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("UNDERWRITE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_value("UNDERWRITE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("UNDERWRITE_LOGGING_LEVEL").or_else(|| read_env("UNDERWRITE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("UNDERWRITE_LOGGING_FORMAT").or_else(|| read_env("UNDERWRITE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(scoring_mode) = overrides.scoring_mode {
            self.scoring.mode = scoring_mode;
        }
        if let Some(max_steps) = overrides.max_steps {
            self.agent.max_steps = max_steps;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_scoring(&self.scoring)?;
        validate_agent(&self.agent)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("underwrite.toml"), PathBuf::from("config/underwrite.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&llm.top_p) || llm.top_p == 0.0 {
        return Err(ConfigError::Validation("llm.top_p must be in range (0.0, 1.0]".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set UNDERWRITE_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_scoring(scoring: &ScoringConfig) -> Result<(), ConfigError> {
    if scoring.timeout_secs == 0 || scoring.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "scoring.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if scoring.mode == ScoringMode::Remote {
        let base_url = scoring.base_url.as_deref().map(str::trim).unwrap_or_default();
        if base_url.is_empty() {
            return Err(ConfigError::Validation(
                "scoring.base_url is required when scoring.mode = \"remote\"".to_string(),
            ));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "scoring.base_url must start with http:// or https://".to_string(),
            ));
        }
        if scoring.risk_endpoint.trim().is_empty() || scoring.premium_endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "scoring.risk_endpoint and scoring.premium_endpoint must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_steps == 0 || agent.max_steps > 32 {
        return Err(ConfigError::Validation("agent.max_steps must be in range 1..=32".to_string()));
    }

    if agent.tool_timeout_secs == 0 || agent.tool_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agent.tool_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if agent.memory_top_k == 0 {
        return Err(ConfigError::Validation(
            "agent.memory_top_k must be greater than zero".to_string(),
        ));
    }

    if agent.invocation_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.invocation_ttl_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    scoring: Option<ScoringPatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ScoringPatch {
    mode: Option<ScoringMode>,
    base_url: Option<String>,
    api_key: Option<String>,
    risk_endpoint: Option<String>,
    premium_endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_steps: Option<u32>,
    tool_timeout_secs: Option<u64>,
    memory_top_k: Option<usize>,
    invocation_ttl_secs: Option<u64>,
    enforce_intent_guard: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat, ScoringMode,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.agent.max_steps == 8, "default step limit should be 8")?;
        ensure(config.scoring.mode == ScoringMode::Heuristic, "default scoring is heuristic")?;
        ensure(
            config.scoring.premium_endpoint == "claim-amount-linear-v2-endpoint",
            "default premium endpoint",
        )?;
        ensure((config.llm.temperature - 0.5).abs() < f32::EPSILON, "default temperature")
    }

    #[test]
    fn shipped_example_config_is_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../config/underwrite.example.toml");
        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            ..LoadOptions::default()
        })
        .map_err(|err| format!("example config failed to load: {err}"))?;

        ensure(config.llm.provider == LlmProvider::Ollama, "example uses ollama")?;
        ensure(config.server.port == 8080, "example port")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_UNDERWRITE_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("underwrite.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_UNDERWRITE_LLM_KEY}"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_UNDERWRITE_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("UNDERWRITE_LOG_LEVEL", "warn");
        env::set_var("UNDERWRITE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["UNDERWRITE_LOG_LEVEL", "UNDERWRITE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("UNDERWRITE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("UNDERWRITE_AGENT_MAX_STEPS", "12");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("underwrite.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[agent]
max_steps = 4
memory_top_k = 5

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.agent.max_steps == 12, "env step limit should win over file")?;
            ensure(config.agent.memory_top_k == 5, "file value should win over default")?;
            Ok(())
        })();

        clear_vars(&["UNDERWRITE_DATABASE_URL", "UNDERWRITE_AGENT_MAX_STEPS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("UNDERWRITE_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["UNDERWRITE_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn remote_scoring_requires_base_url() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                scoring_mode: Some(ScoringMode::Remote),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .err()
        .ok_or_else(|| "remote scoring without base_url must fail".to_string())?;

        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("scoring.base_url")),
            "validation failure should mention scoring.base_url",
        )
    }

    #[test]
    fn step_limit_is_bounded() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { max_steps: Some(0), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        })
        .err()
        .ok_or_else(|| "max_steps = 0 must fail".to_string())?;

        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("agent.max_steps")),
            "validation failure should mention agent.max_steps",
        )
    }

    #[test]
    fn invalid_env_number_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("UNDERWRITE_SERVER_PORT", "eighty");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "UNDERWRITE_SERVER_PORT", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["UNDERWRITE_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("UNDERWRITE_LLM_PROVIDER", "openai");
        env::set_var("UNDERWRITE_LLM_API_KEY", "sk-secret-value");
        env::set_var("UNDERWRITE_SCORING_API_KEY", "scoring-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain llm key")?;
            ensure(
                !debug.contains("scoring-secret-value"),
                "debug output should not contain scoring key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "UNDERWRITE_LLM_PROVIDER",
            "UNDERWRITE_LLM_API_KEY",
            "UNDERWRITE_SCORING_API_KEY",
        ]);
        result
    }
}
