use std::env;
use std::time::Duration;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // AI providers
    pub anthropic_api_key: String,
    pub anthropic_model: String,

    // Sources
    pub news_api_key: String,
    pub tavily_api_key: String,
    pub ncbi_api_key: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,
    pub scan_secret: String,
    pub public_origin: Option<String>,

    // Scheduling
    pub scheduler_interval_minutes: u64,
    pub schedule_tolerance_minutes: i64,
    pub scan_timeout_minutes: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    /// Load configuration for the scan worker and CLI.
    /// Panics with a clear message if required vars are missing.
    pub fn scout_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            news_api_key: optional_env("NEWS_API_KEY"),
            tavily_api_key: optional_env("TAVILY_API_KEY"),
            ncbi_api_key: optional_env("NCBI_API_KEY"),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parsed_env("API_PORT", 3000),
            scan_secret: optional_env("SCAN_SECRET"),
            public_origin: env::var("PUBLIC_ORIGIN").ok().filter(|s| !s.is_empty()),
            scheduler_interval_minutes: parsed_env("SCHEDULER_INTERVAL_MINUTES", 0),
            schedule_tolerance_minutes: parsed_env("SCHEDULE_TOLERANCE_MINUTES", 20),
            scan_timeout_minutes: parsed_env("SCAN_TIMEOUT_MINUTES", 10),
            http_timeout_secs: parsed_env("HTTP_TIMEOUT_SECS", 30),
        }
    }

    /// Load configuration for the HTTP API. The scan secret is mandatory here.
    pub fn api_from_env() -> Self {
        let config = Self::scout_from_env();
        if config.scan_secret.is_empty() {
            panic!("SCAN_SECRET environment variable is required");
        }
        config
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_minutes * 60)
    }

    /// Log which settings are present without printing secrets.
    pub fn log_redacted(&self) {
        info!(
            database_url = redact(&self.database_url),
            anthropic = present(&self.anthropic_api_key),
            model = self.anthropic_model.as_str(),
            news_api = present(&self.news_api_key),
            tavily = present(&self.tavily_api_key),
            ncbi = present(&self.ncbi_api_key),
            scan_secret = present(&self.scan_secret),
            public_origin = self.public_origin.as_deref().unwrap_or("-"),
            api_addr = format!("{}:{}", self.api_host, self.api_port),
            scheduler_interval_minutes = self.scheduler_interval_minutes,
            schedule_tolerance_minutes = self.schedule_tolerance_minutes,
            scan_timeout_minutes = self.scan_timeout_minutes,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> String {
    env::var(key).unwrap_or_default()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}

fn present(value: &str) -> &'static str {
    if value.is_empty() {
        "missing"
    } else {
        "set"
    }
}

/// Keep the scheme and host of a connection URL, drop credentials and path.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "***".to_string();
    };
    let host = rest.rsplit_once('@').map(|(_, h)| h).unwrap_or(rest);
    let host = host.split('/').next().unwrap_or_default();
    format!("{scheme}://***@{host}")
}
