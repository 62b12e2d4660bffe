use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub catalog_path: PathBuf,

    pub upstream_base_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub upstream_page_size: u32,
    pub upstream_request_timeout_secs: u64,
    pub upstream_rate_limit_requests: u32,
    pub upstream_rate_limit_window_secs: u64,
    pub upstream_rate_limit_timeout_ms: u64,
    pub upstream_max_attempts: u32,
    pub upstream_backoff_base_ms: u64,
    pub upstream_backoff_cap_ms: u64,

    pub bucket_width_secs: i64,
    pub grace_period_secs: i64,
    pub retention_windows: usize,
    pub fuzzy_threshold: f64,
    pub min_confidence: f64,
    pub baseline_windows: usize,
    pub ewma_alpha: f64,
    pub zero_baseline_score: f64,

    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub cache_page_size: usize,
    pub cache_rebuild_timeout_ms: u64,

    pub ingest_cron: String,
    pub tick_cron: String,
    pub sweep_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("catalog_path", &self.catalog_path)
            .field("upstream_base_url", &self.upstream_base_url)
            .field(
                "upstream_api_key",
                &self.upstream_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("upstream_page_size", &self.upstream_page_size)
            .field(
                "upstream_request_timeout_secs",
                &self.upstream_request_timeout_secs,
            )
            .field(
                "upstream_rate_limit_requests",
                &self.upstream_rate_limit_requests,
            )
            .field(
                "upstream_rate_limit_window_secs",
                &self.upstream_rate_limit_window_secs,
            )
            .field(
                "upstream_rate_limit_timeout_ms",
                &self.upstream_rate_limit_timeout_ms,
            )
            .field("upstream_max_attempts", &self.upstream_max_attempts)
            .field("upstream_backoff_base_ms", &self.upstream_backoff_base_ms)
            .field("upstream_backoff_cap_ms", &self.upstream_backoff_cap_ms)
            .field("bucket_width_secs", &self.bucket_width_secs)
            .field("grace_period_secs", &self.grace_period_secs)
            .field("retention_windows", &self.retention_windows)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field("min_confidence", &self.min_confidence)
            .field("baseline_windows", &self.baseline_windows)
            .field("ewma_alpha", &self.ewma_alpha)
            .field("zero_baseline_score", &self.zero_baseline_score)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_max_entries", &self.cache_max_entries)
            .field("cache_page_size", &self.cache_page_size)
            .field("cache_rebuild_timeout_ms", &self.cache_rebuild_timeout_ms)
            .field("ingest_cron", &self.ingest_cron)
            .field("tick_cron", &self.tick_cron)
            .field("sweep_cron", &self.sweep_cron)
            .finish()
    }
}
