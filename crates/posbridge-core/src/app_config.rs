use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

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
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Maximum snapshot age before a lookup triggers a reload.
    pub cache_ttl_secs: u64,
    /// Upper bound on a single store-config load from Postgres.
    pub load_timeout_secs: u64,
    /// Local hour at which a restaurant's business day rolls over.
    pub business_day_cutoff_hour: u32,
    /// Where the warm-start snapshot lives. `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
    pub refresh_cron: String,
    /// Requests each API client may make per rate-limit window.
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl AppConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("load_timeout_secs", &self.load_timeout_secs)
            .field("business_day_cutoff_hour", &self.business_day_cutoff_hour)
            .field("snapshot_path", &self.snapshot_path)
            .field("refresh_cron", &self.refresh_cron)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .finish()
    }
}
