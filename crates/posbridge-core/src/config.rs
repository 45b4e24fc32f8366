use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
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
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("POSBRIDGE_ENV", "development"))?;

    let bind_addr = parse("POSBRIDGE_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("POSBRIDGE_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("POSBRIDGE_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("POSBRIDGE_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("POSBRIDGE_DB_ACQUIRE_TIMEOUT_SECS", "10")?;
    if db_min_connections > db_max_connections {
        return Err(ConfigError::InvalidEnvVar {
            var: "POSBRIDGE_DB_MIN_CONNECTIONS".to_string(),
            reason: format!(
                "must not exceed POSBRIDGE_DB_MAX_CONNECTIONS ({db_max_connections})"
            ),
        });
    }

    let cache_ttl_secs = parse_u64("POSBRIDGE_CACHE_TTL_SECS", "900")?;
    if cache_ttl_secs == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "POSBRIDGE_CACHE_TTL_SECS".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    let load_timeout_secs = parse_u64("POSBRIDGE_LOAD_TIMEOUT_SECS", "5")?;
    if load_timeout_secs == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "POSBRIDGE_LOAD_TIMEOUT_SECS".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    let business_day_cutoff_hour = parse_u32("POSBRIDGE_BUSINESS_DAY_CUTOFF_HOUR", "5")?;
    if business_day_cutoff_hour > 23 {
        return Err(ConfigError::InvalidEnvVar {
            var: "POSBRIDGE_BUSINESS_DAY_CUTOFF_HOUR".to_string(),
            reason: format!("{business_day_cutoff_hour} is not an hour of the day (0-23)"),
        });
    }

    let snapshot_path = lookup("POSBRIDGE_SNAPSHOT_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    let refresh_cron = or_default("POSBRIDGE_REFRESH_CRON", "0 */5 * * * *");

    let rate_limit_max_requests = parse_u32("POSBRIDGE_RATE_LIMIT_MAX_REQUESTS", "600")?;
    let rate_limit_window_secs = parse_u64("POSBRIDGE_RATE_LIMIT_WINDOW_SECS", "60")?;
    for (var, value) in [
        ("POSBRIDGE_RATE_LIMIT_MAX_REQUESTS", u64::from(rate_limit_max_requests)),
        ("POSBRIDGE_RATE_LIMIT_WINDOW_SECS", rate_limit_window_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
    }

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        cache_ttl_secs,
        load_timeout_secs,
        business_day_cutoff_hour,
        snapshot_path,
        refresh_cron,
        rate_limit_max_requests,
        rate_limit_window_secs,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for anything other than
/// `development`, `test` or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "POSBRIDGE_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
