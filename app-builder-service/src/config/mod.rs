use secrecy::SecretString;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Deserialize)]
pub struct AppBuilderConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub auth: AuthConfig,
    pub llm: LlmConfig,
    pub github: GithubConfig,
    pub evaluation: EvaluationConfig,
    pub pipeline: PipelineConfig,
    pub registry: RegistryConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret every build request must present.
    pub secret_key: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    /// OpenAI-compatible base URL (Groq by default).
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    pub token: Option<SecretString>,
    pub api_url: String,
    pub pages_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub time_limit_seconds: u64,
    /// Pause between deploying and notifying the evaluator.
    pub pages_settle_ms: u64,
    pub secret_scan_mode: SecretScanMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Unset keeps the task registry in memory.
    pub mongodb_uri: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub builds_per_minute: u32,
}

/// What to do when generated files look like they contain credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretScanMode {
    Warn,
    Redact,
    Block,
}

impl FromStr for SecretScanMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(SecretScanMode::Warn),
            "redact" => Ok(SecretScanMode::Redact),
            "block" => Ok(SecretScanMode::Block),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "SECRET_SCAN_MODE must be one of warn, redact, block (got '{}')",
                other
            ))),
        }
    }
}

impl AppBuilderConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_vars(common_config, |key| env::var(key).ok())
    }

    /// Service settings read through `var`, keyed like the environment.
    pub fn from_vars<F>(common: core_config::Config, var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var: Lookup = &var;

        Ok(AppBuilderConfig {
            common,
            auth: AuthConfig {
                secret_key: get_secret(var, "SECRET_KEY"),
            },
            llm: LlmConfig {
                api_key: get_secret(var, "LLM_API_KEY"),
                base_url: get_env(var, "LLM_BASE_URL", DEFAULT_LLM_BASE_URL),
                model: get_env(var, "LLM_MODEL", DEFAULT_LLM_MODEL),
                max_tokens: get_parsed(var, "LLM_MAX_TOKENS", 8000),
                timeout_seconds: get_parsed(var, "LLM_TIMEOUT_SECONDS", 300),
            },
            github: GithubConfig {
                token: get_secret(var, "GITHUB_TOKEN"),
                api_url: get_env(var, "GITHUB_API_URL", DEFAULT_GITHUB_API_URL),
                pages_branch: get_env(var, "GITHUB_PAGES_BRANCH", "main"),
            },
            evaluation: EvaluationConfig {
                timeout_seconds: get_parsed(var, "EVALUATION_TIMEOUT_SECONDS", 30),
                max_attempts: get_parsed(var, "EVALUATION_MAX_ATTEMPTS", 4),
                initial_backoff_ms: get_parsed(var, "EVALUATION_INITIAL_BACKOFF_MS", 1000),
            },
            pipeline: PipelineConfig {
                time_limit_seconds: get_parsed(var, "BUILD_TIME_LIMIT_SECONDS", 600),
                pages_settle_ms: get_parsed(var, "PAGES_SETTLE_MS", 3000),
                secret_scan_mode: get_env(var, "SECRET_SCAN_MODE", "redact").parse()?,
            },
            registry: RegistryConfig {
                mongodb_uri: var("MONGODB_URI").filter(|v| !v.is_empty()),
                database: get_env(var, "MONGODB_DATABASE", "app_builder"),
            },
            rate_limit: RateLimitConfig {
                builds_per_minute: get_parsed(var, "BUILD_RATE_LIMIT_PER_MIN", 30),
            },
        })
    }

    pub fn secret_configured(&self) -> bool {
        self.auth.secret_key.is_some()
    }

    pub fn github_configured(&self) -> bool {
        self.github.token.is_some()
    }

    pub fn llm_configured(&self) -> bool {
        self.llm.api_key.is_some()
    }
}

impl EvaluationConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::doubling(
            self.max_attempts.max(1),
            Duration::from_millis(self.initial_backoff_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl PipelineConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_seconds)
    }

    /// A build that has used up its whole budget counts as late.
    pub fn time_limit_reached(&self, elapsed: Duration) -> bool {
        elapsed >= self.time_limit()
    }

    pub fn pages_settle(&self) -> Duration {
        Duration::from_millis(self.pages_settle_ms)
    }
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn get_env(var: Lookup, key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn get_secret(var: Lookup, key: &str) -> Option<SecretString> {
    var(key)
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::new)
}

fn get_parsed<T: FromStr + Copy>(var: Lookup, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = key, value = %raw, "Unparseable value, using default");
            default
        }),
        None => default,
    }
}
