use crate::metrics::MetricTable;
use std::{env, path::PathBuf, time::Duration};

/// Bump to discard every persisted cache on next open.
pub const SCHEMA_VERSION: &str = "2012-11-28";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix of the per-metric series URLs, ending in `/`.
    pub base_url: String,
    /// Prefix of the site events URL; events are skipped when unset.
    pub events_url: Option<String>,
    /// Which add-on (or `globalstats`) the persisted blob belongs to.
    pub scope: String,
    pub schema_version: String,
    /// Attempts per fetch while the server answers 202.
    pub max_attempts: u32,
    /// Wait between attempts when the server sends no `Retry-After`.
    pub default_retry: Duration,
    /// Debounce before the store is written out.
    pub write_delay: Duration,
    /// Dotted components kept from application versions.
    pub version_precision: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/statistics/".to_string(),
            events_url: None,
            scope: "globalstats".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            max_attempts: 10,
            default_retry: Duration::from_secs(30),
            write_delay: Duration::from_secs(1),
            version_precision: 2,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("STATS_BASE_URL")
                .map(with_trailing_slash)
                .unwrap_or(defaults.base_url),
            events_url: env::var("STATS_EVENTS_URL").ok().map(with_trailing_slash),
            scope: env::var("STATS_SCOPE")
                .ok()
                .filter(|scope| !scope.trim().is_empty())
                .unwrap_or(defaults.scope),
            schema_version: env::var("STATS_SCHEMA_VERSION").unwrap_or(defaults.schema_version),
            max_attempts: parsed("STATS_MAX_RETRIES").unwrap_or(defaults.max_attempts),
            default_retry: parsed("STATS_RETRY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_retry),
            write_delay: parsed("STATS_WRITE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_delay),
            version_precision: parsed("STATS_VERSION_PRECISION")
                .unwrap_or(defaults.version_precision),
        }
    }
}

/// Metric presets, one per product skin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    Addons,
    Marketplace,
}

impl Product {
    pub fn metric_table(self) -> MetricTable {
        match self {
            Product::Addons => MetricTable::addons(),
            Product::Marketplace => MetricTable::marketplace(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub product: Product,
    pub cache: CacheConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let product = match env::var("STATS_PRODUCT").as_deref() {
            Ok("marketplace") | Ok("mkt") => Product::Marketplace,
            _ => Product::Addons,
        };
        Self {
            port: parsed("PORT").unwrap_or(8080),
            data_dir: resolve_data_dir(),
            product,
            cache: CacheConfig::from_env(),
        }
    }
}

pub fn resolve_data_dir() -> PathBuf {
    if let Ok(path) = env::var("STATS_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("data")
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_dashboard() {
        let config = CacheConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.default_retry, Duration::from_secs(30));
        assert_eq!(config.write_delay, Duration::from_secs(1));
        assert_eq!(config.version_precision, 2);
        assert_eq!(config.scope, "globalstats");
    }

    #[test]
    fn base_urls_get_a_trailing_slash() {
        assert_eq!(with_trailing_slash("http://x/stats".into()), "http://x/stats/");
        assert_eq!(with_trailing_slash("http://x/stats/".into()), "http://x/stats/");
    }
}
