use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_KNOWLEDGE_URL: &str = "https://raw.githubusercontent.com/xerimaii-code/winpos3/main/winpos3.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub proxy_url: String,
    pub query_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub reconnect_interval_seconds: u64,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_seconds: u64,
    pub target_timezone: Tz,
    pub sql_dialect: String,
    pub partition_table_prefix: String,
    pub max_context_chars: usize,
    pub analysis_preview_rows: usize,
    pub default_knowledge_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
            database_path: PathBuf::from("./data/knowledge.db"),
            proxy_url: "http://127.0.0.1:3000/api/query".to_string(),
            query_timeout_ms: 15_000,
            probe_timeout_ms: 15_000,
            reconnect_interval_seconds: 30,
            llm_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            llm_api_key: None,
            llm_model: "gemini-2.5-flash".to_string(),
            llm_timeout_seconds: 60,
            target_timezone: chrono_tz::Asia::Seoul,
            sql_dialect: "Microsoft SQL Server (T-SQL)".to_string(),
            partition_table_prefix: "outm_".to_string(),
            max_context_chars: 24_000,
            analysis_preview_rows: 5,
            default_knowledge_url: DEFAULT_KNOWLEDGE_URL.to_string(),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        #[cfg(feature = "cli")]
        {
            if let Err(e) = dotenvy::dotenv() {
                tracing::warn!("Failed to load .env file: {}. Using system environment variables.", e);
            } else {
                info!("Loaded environment variables from .env file");
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default);

        let target_timezone = match lookup("TARGET_TIMEZONE").filter(|v| !v.trim().is_empty()) {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow!("{}", e))
                .with_context(|| format!("Unknown TARGET_TIMEZONE: {}", name))?,
            None => defaults.target_timezone,
        };

        Ok(Self {
            api_host: text("API_HOST", defaults.api_host),
            api_port: parse_or(&lookup, "API_PORT", defaults.api_port)?,
            database_path: PathBuf::from(text("DATABASE_PATH", defaults.database_path.to_string_lossy().into_owned())),
            proxy_url: text("PROXY_URL", defaults.proxy_url),
            query_timeout_ms: parse_or(&lookup, "QUERY_TIMEOUT_MS", defaults.query_timeout_ms)?,
            probe_timeout_ms: parse_or(&lookup, "PROBE_TIMEOUT_MS", defaults.probe_timeout_ms)?,
            reconnect_interval_seconds: parse_or(&lookup, "RECONNECT_INTERVAL_SECONDS", defaults.reconnect_interval_seconds)?,
            llm_base_url: text("LLM_BASE_URL", defaults.llm_base_url),
            llm_api_key: lookup("LLM_API_KEY").filter(|v| !v.trim().is_empty()),
            llm_model: text("LLM_MODEL", defaults.llm_model),
            llm_timeout_seconds: parse_or(&lookup, "LLM_TIMEOUT_SECONDS", defaults.llm_timeout_seconds)?,
            target_timezone,
            sql_dialect: text("SQL_DIALECT", defaults.sql_dialect),
            // An explicitly empty prefix turns the partition hint off.
            partition_table_prefix: lookup("PARTITION_TABLE_PREFIX").unwrap_or(defaults.partition_table_prefix),
            max_context_chars: parse_or(&lookup, "MAX_CONTEXT_CHARS", defaults.max_context_chars)?,
            analysis_preview_rows: parse_or(&lookup, "ANALYSIS_PREVIEW_ROWS", defaults.analysis_preview_rows)?,
            default_knowledge_url: text("DEFAULT_KNOWLEDGE_URL", defaults.default_knowledge_url),
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- Proxy URL: {}", self.proxy_url);
        info!("- Query Timeout: {}ms (probe {}ms)", self.query_timeout_ms, self.probe_timeout_ms);
        info!("- Reconnect Interval: {}s", self.reconnect_interval_seconds);
        info!("- LLM: {} @ {}", self.llm_model, self.llm_base_url);
        info!("- LLM API Key: {}", if self.llm_api_key.is_some() { "configured" } else { "missing" });
        info!("- LLM Timeout: {}s", self.llm_timeout_seconds);
        info!("- Timezone: {}", self.target_timezone.name());
        info!("- Dialect: {}", self.sql_dialect);
        info!("- Partition Prefix: {:?}", self.partition_table_prefix);
        info!("- Max Context: {} chars", self.max_context_chars);
        info!("- Knowledge Reference Default: {}", self.default_knowledge_url);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    /// `None` when automatic reconnect is disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_interval_seconds > 0).then(|| Duration::from_secs(self.reconnect_interval_seconds))
    }
}
