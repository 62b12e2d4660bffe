use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// One year of hourly windows.
const MAX_RETENTION_WINDOWS: usize = 8_760;
/// One month of hourly windows.
const MAX_BASELINE_WINDOWS: usize = 720;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };
    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let env = parse_environment(&or_default("TRENDPULSE_ENV", "development"))?;
    let bind_addr: SocketAddr =
        parse_var(&lookup, "TRENDPULSE_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("TRENDPULSE_LOG_LEVEL", "info");
    let database_url = optional("DATABASE_URL");
    let catalog_path = PathBuf::from(or_default(
        "TRENDPULSE_CATALOG_PATH",
        "./config/entities.yaml",
    ));

    let fuzzy_threshold = parse_unit_interval(&lookup, "TRENDPULSE_FUZZY_THRESHOLD", "0.85")?;
    let min_confidence = parse_unit_interval(&lookup, "TRENDPULSE_MIN_CONFIDENCE", "0.0")?;
    let ewma_alpha = parse_unit_interval(&lookup, "TRENDPULSE_EWMA_ALPHA", "0.6")?;
    let zero_baseline_score =
        parse_unit_interval(&lookup, "TRENDPULSE_ZERO_BASELINE_SCORE", "0.5")?;

    let bucket_width_secs: i64 = parse_var(&lookup, "TRENDPULSE_BUCKET_WIDTH_SECS", "3600")?;
    if bucket_width_secs <= 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "TRENDPULSE_BUCKET_WIDTH_SECS".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    let grace_period_secs: i64 = parse_var(&lookup, "TRENDPULSE_GRACE_PERIOD_SECS", "300")?;
    if grace_period_secs < 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "TRENDPULSE_GRACE_PERIOD_SECS".to_string(),
            reason: "must not be negative".to_string(),
        });
    }

    let retention_windows =
        parse_bounded_count(&lookup, "TRENDPULSE_RETENTION_WINDOWS", "168", MAX_RETENTION_WINDOWS)?;
    let baseline_windows =
        parse_bounded_count(&lookup, "TRENDPULSE_BASELINE_WINDOWS", "6", MAX_BASELINE_WINDOWS)?;
    if baseline_windows >= retention_windows {
        return Err(ConfigError::InvalidEnvVar {
            var: "TRENDPULSE_BASELINE_WINDOWS".to_string(),
            reason: format!(
                "{baseline_windows} must be below TRENDPULSE_RETENTION_WINDOWS ({retention_windows})"
            ),
        });
    }

    let upstream_rate_limit_requests: u32 =
        parse_var(&lookup, "UPSTREAM_RATE_LIMIT_REQUESTS", "100")?;
    if upstream_rate_limit_requests == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "UPSTREAM_RATE_LIMIT_REQUESTS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        database_url,
        db_max_connections: parse_var(&lookup, "TRENDPULSE_DB_MAX_CONNECTIONS", "10")?,
        db_min_connections: parse_var(&lookup, "TRENDPULSE_DB_MIN_CONNECTIONS", "1")?,
        db_acquire_timeout_secs: parse_var(&lookup, "TRENDPULSE_DB_ACQUIRE_TIMEOUT_SECS", "10")?,
        catalog_path,
        upstream_base_url: optional("UPSTREAM_BASE_URL"),
        upstream_api_key: optional("UPSTREAM_API_KEY"),
        upstream_page_size: parse_var(&lookup, "UPSTREAM_PAGE_SIZE", "100")?,
        upstream_request_timeout_secs: parse_var(&lookup, "UPSTREAM_REQUEST_TIMEOUT_SECS", "30")?,
        upstream_rate_limit_requests,
        upstream_rate_limit_window_secs: parse_var(
            &lookup,
            "UPSTREAM_RATE_LIMIT_WINDOW_SECS",
            "60",
        )?,
        upstream_rate_limit_timeout_ms: parse_var(
            &lookup,
            "UPSTREAM_RATE_LIMIT_TIMEOUT_MS",
            "10000",
        )?,
        upstream_max_attempts: parse_var(&lookup, "UPSTREAM_MAX_ATTEMPTS", "4")?,
        upstream_backoff_base_ms: parse_var(&lookup, "UPSTREAM_BACKOFF_BASE_MS", "1000")?,
        upstream_backoff_cap_ms: parse_var(&lookup, "UPSTREAM_BACKOFF_CAP_MS", "30000")?,
        bucket_width_secs,
        grace_period_secs,
        retention_windows,
        fuzzy_threshold,
        min_confidence,
        baseline_windows,
        ewma_alpha,
        zero_baseline_score,
        cache_ttl_secs: parse_var(&lookup, "TRENDPULSE_CACHE_TTL_SECS", "60")?,
        cache_max_entries: parse_var(&lookup, "TRENDPULSE_CACHE_MAX_ENTRIES", "1000")?,
        cache_page_size: parse_var(&lookup, "TRENDPULSE_CACHE_PAGE_SIZE", "100")?,
        cache_rebuild_timeout_ms: parse_var(
            &lookup,
            "TRENDPULSE_CACHE_REBUILD_TIMEOUT_MS",
            "5000",
        )?,
        ingest_cron: or_default("TRENDPULSE_INGEST_CRON", "0 */5 * * * *"),
        tick_cron: or_default("TRENDPULSE_TICK_CRON", "0 * * * * *"),
        sweep_cron: or_default("TRENDPULSE_SWEEP_CRON", "0 */15 * * * *"),
    })
}

/// Parse `var` (or `default` when unset) into `T`.
fn parse_var<F, T>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

fn parse_unit_interval<F>(lookup: &F, var: &str, default: &str) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let value: f64 = parse_var(lookup, var, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(value)
}

/// Parse a window count in `1..=max`.
fn parse_bounded_count<F>(
    lookup: &F,
    var: &str,
    default: &str,
    max: usize,
) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let value: usize = parse_var(lookup, var, default)?;
    if !(1..=max).contains(&value) {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("{value} is outside [1, {max}]"),
        });
    }
    Ok(value)
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "TRENDPULSE_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
