// Configuration for codenav
// Reads from environment variables with sensible defaults

use crate::bundle::CacheSizes;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Store connection pool size (CODENAV_POOL_SIZE)
    pub pool_size: u32,

    /// Store pool minimum idle connections (CODENAV_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Referencing dumps fetched per batch during cross-repository search
    /// (CODENAV_REMOTE_DUMP_LIMIT)
    pub remote_dump_limit: usize,

    /// Default page size for reference requests (CODENAV_REFERENCE_PAGE_LIMIT)
    pub reference_page_limit: usize,

    /// Documents cached per open bundle (CODENAV_DOCUMENT_CACHE_SIZE)
    pub document_cache_size: usize,

    /// Result chunks cached per open bundle (CODENAV_RESULT_CHUNK_CACHE_SIZE)
    pub result_chunk_cache_size: usize,

    /// Operations slower than this are logged (CODENAV_SLOW_QUERY_MS)
    pub slow_query_ms: u64,

    /// Maximum ancestor distance searched for visible dumps
    /// (CODENAV_COMMIT_TRAVERSAL_LIMIT)
    pub commit_traversal_limit: usize,

    /// Commits read from git per repository update (CODENAV_GIT_LOG_MAX_COMMITS)
    pub git_log_max_commits: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_min_idle: 2,
            remote_dump_limit: 20,
            reference_page_limit: 100,
            document_cache_size: 256,
            result_chunk_cache_size: 256,
            slow_query_ms: 100,
            commit_traversal_limit: 100,
            git_log_max_commits: 5000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        let read: &dyn Fn(&str) -> Option<String> = &lookup;

        override_from(read, "CODENAV_POOL_SIZE", &mut config.pool_size);
        override_from(read, "CODENAV_POOL_MIN_IDLE", &mut config.pool_min_idle);
        override_from(read, "CODENAV_REMOTE_DUMP_LIMIT", &mut config.remote_dump_limit);
        override_from(read, "CODENAV_REFERENCE_PAGE_LIMIT", &mut config.reference_page_limit);
        override_from(read, "CODENAV_DOCUMENT_CACHE_SIZE", &mut config.document_cache_size);
        override_from(
            read,
            "CODENAV_RESULT_CHUNK_CACHE_SIZE",
            &mut config.result_chunk_cache_size,
        );
        override_from(read, "CODENAV_SLOW_QUERY_MS", &mut config.slow_query_ms);
        override_from(
            read,
            "CODENAV_COMMIT_TRAVERSAL_LIMIT",
            &mut config.commit_traversal_limit,
        );
        override_from(read, "CODENAV_GIT_LOG_MAX_COMMITS", &mut config.git_log_max_commits);

        if config.pool_min_idle > config.pool_size {
            warn!(
                pool_size = config.pool_size,
                pool_min_idle = config.pool_min_idle,
                "CODENAV_POOL_MIN_IDLE exceeds CODENAV_POOL_SIZE, clamping"
            );
            config.pool_min_idle = config.pool_size;
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        CacheSizes {
            documents: self.document_cache_size,
            result_chunks: self.result_chunk_cache_size,
        }
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }
}

fn override_from<T>(read: &dyn Fn(&str) -> Option<String>, key: &str, field: &mut T)
where
    T: FromStr + Display,
{
    let Some(val) = read(key) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *field = parsed,
        Err(_) => warn!("Invalid {key} value: {val}, using default: {field}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.pool_min_idle, 2);
        assert_eq!(config.remote_dump_limit, 20);
        assert_eq!(config.reference_page_limit, 100);
        assert_eq!(config.slow_query_threshold(), Duration::from_millis(100));
        assert_eq!(config.git_log_max_commits, 5000);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let config = Config::from_lookup(lookup(&[
            ("CODENAV_REMOTE_DUMP_LIMIT", "5"),
            ("CODENAV_DOCUMENT_CACHE_SIZE", " 32 "),
            ("CODENAV_SLOW_QUERY_MS", "soon"),
        ]));
        assert_eq!(config.remote_dump_limit, 5);
        assert_eq!(config.cache_sizes().documents, 32);
        assert_eq!(config.slow_query_ms, 100);
    }

    #[test]
    fn clamps_min_idle_to_pool_size() {
        let config = Config::from_lookup(lookup(&[
            ("CODENAV_POOL_SIZE", "1"),
            ("CODENAV_POOL_MIN_IDLE", "4"),
        ]));
        assert_eq!(config.pool_min_idle, 1);
    }
}
