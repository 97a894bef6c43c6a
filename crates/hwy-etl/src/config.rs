//! ETL configuration from environment.

use hwy_core::DEFAULT_THRESHOLD_M;
use hwy_source::{SourceOptions, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub db_max_connections: u32,
    /// Replaces the bundled state catalog when set.
    pub state_catalog: Option<PathBuf>,
    pub source_timeout_secs: u64,
    pub page_size: usize,
    pub concurrency_threshold_m: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "data/highways.db".to_string(),
            db_max_connections: 4,
            state_catalog: None,
            source_timeout_secs: DEFAULT_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency_threshold_m: DEFAULT_THRESHOLD_M,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("HWY_DATABASE_PATH").unwrap_or(defaults.database_path),
            db_max_connections: parse_var("HWY_DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.db_max_connections),
            state_catalog: env::var("HWY_STATE_CATALOG")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            source_timeout_secs: parse_var("HWY_SOURCE_TIMEOUT_SECS")
                .unwrap_or(defaults.source_timeout_secs),
            page_size: parse_var("HWY_PAGE_SIZE")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.page_size),
            concurrency_threshold_m: parse_var("HWY_CONCURRENCY_THRESHOLD_M")
                .filter(|m: &f64| m.is_finite() && *m > 0.0)
                .unwrap_or(defaults.concurrency_threshold_m),
        }
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            timeout: Duration::from_secs(self.source_timeout_secs),
            page_size: self.page_size,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.database_path, "data/highways.db");
        assert_eq!(config.db_max_connections, 4);
        assert_eq!(config.page_size, 2_000);
        assert_eq!(config.source_options().timeout, Duration::from_secs(30));
        assert_eq!(config.concurrency_threshold_m, 500.0);
    }

    #[test]
    fn parse_var_ignores_garbage() {
        std::env::set_var("HWY_TEST_PARSE_VAR", " 12 ");
        assert_eq!(parse_var::<u32>("HWY_TEST_PARSE_VAR"), Some(12));
        std::env::set_var("HWY_TEST_PARSE_VAR", "twelve");
        assert_eq!(parse_var::<u32>("HWY_TEST_PARSE_VAR"), None);
        std::env::remove_var("HWY_TEST_PARSE_VAR");
    }
}
