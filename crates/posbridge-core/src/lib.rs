mod app_config;
pub mod clock;
mod config;
pub mod store;
pub mod timezone;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::{load_app_config, load_app_config_from_env};
pub use store::{
    validate_hour_range, DailyHours, DayHours, DayOfWeek, StoreConfig, StoreConfigError,
};
pub use timezone::{BusinessTimestamps, TimezoneError, TimezoneResolver, DEFAULT_CUTOFF_HOUR};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
