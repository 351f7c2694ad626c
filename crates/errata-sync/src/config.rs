//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::DbConfig;

// ============================================================================
// Upstream Configuration Constants
// ============================================================================

/// Default upstream metadata service address for local development.
pub const DEFAULT_VMAAS_ADDRESS: &str = "http://localhost:8080";

/// Default path of the errata endpoint, relative to the address.
pub const DEFAULT_ERRATA_PATH: &str = "/api/v3/errata";

/// Default number of advisories requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Upper bound on pages fetched in one run, whatever the upstream reports.
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// Default number of extra attempts for a transient page failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial retry backoff in milliseconds (doubled per attempt).
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Ceiling for a single retry backoff.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// Reconcile / Scheduling Constants
// ============================================================================

/// Default number of advisories written per transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default period between scheduled runs in seconds (1 hour).
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 3_600;

/// Default Postgres advisory lock key guarding sync runs.
pub const DEFAULT_SYNC_LOCK_KEY: i64 = 0x6572_7261_7461;

/// Top-level configuration for the sync service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DbConfig,
    pub upstream: UpstreamConfig,
    pub sync: SyncConfig,
}

/// Upstream errata service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub address: String,
    pub errata_path: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub max_pages: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

/// Sync run behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Advisories per reconcile transaction
    pub chunk_size: usize,
    /// Request only advisories modified since the last successful run
    pub incremental: bool,
    pub interval_secs: u64,
    pub lock_key: i64,
}

impl UpstreamConfig {
    /// Full URL of the errata endpoint
    pub fn errata_url(&self) -> String {
        format!(
            "{}/{}",
            self.address.trim_end_matches('/'),
            self.errata_path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Backoff before retry number `retry` (1-based), doubling up to the ceiling
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_backoff()
            .checked_mul(factor)
            .map_or(MAX_RETRY_BACKOFF, |d| d.min(MAX_RETRY_BACKOFF))
    }

    /// Longest one page may take with every retry and backoff used up
    pub fn page_deadline(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let requests = self.request_timeout().saturating_mul(attempts);
        (1..=self.max_retries)
            .map(|retry| self.backoff_for(retry))
            .fold(requests, Duration::saturating_add)
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DbConfig::from_env(),
            upstream: UpstreamConfig {
                address: std::env::var("VMAAS_ADDRESS")
                    .unwrap_or_else(|_| DEFAULT_VMAAS_ADDRESS.to_string()),
                errata_path: std::env::var("VMAAS_ERRATA_PATH")
                    .unwrap_or_else(|_| DEFAULT_ERRATA_PATH.to_string()),
                page_size: env_or("SYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE),
                request_timeout_secs: env_or(
                    "SYNC_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
                max_pages: env_or("SYNC_MAX_PAGES", DEFAULT_MAX_PAGES),
                max_retries: env_or("SYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                retry_backoff_ms: env_or("SYNC_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS),
            },
            sync: SyncConfig {
                chunk_size: env_or("SYNC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                incremental: env_or("SYNC_INCREMENTAL", false),
                interval_secs: env_or("SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS),
                lock_key: env_or("SYNC_LOCK_KEY", DEFAULT_SYNC_LOCK_KEY),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()?;

        if self.upstream.address.trim().is_empty() {
            anyhow::bail!("VMAAS_ADDRESS cannot be empty");
        }

        if !self.upstream.address.starts_with("http://")
            && !self.upstream.address.starts_with("https://")
        {
            anyhow::bail!(
                "VMAAS_ADDRESS must be an http(s) URL, got '{}'",
                self.upstream.address
            );
        }

        if self.upstream.page_size == 0 {
            anyhow::bail!("SYNC_PAGE_SIZE must be greater than 0");
        }

        if self.upstream.request_timeout_secs == 0 {
            anyhow::bail!("SYNC_REQUEST_TIMEOUT_SECS must be greater than 0");
        }

        if self.upstream.max_pages == 0 {
            anyhow::bail!("SYNC_MAX_PAGES must be greater than 0");
        }

        if self.sync.chunk_size == 0 {
            anyhow::bail!("SYNC_CHUNK_SIZE must be greater than 0");
        }

        if self.sync.interval_secs == 0 {
            anyhow::bail!("SYNC_INTERVAL_SECS must be greater than 0");
        }

        Ok(())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_VMAAS_ADDRESS.to_string(),
            errata_path: DEFAULT_ERRATA_PATH.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_pages: DEFAULT_MAX_PAGES,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            incremental: false,
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            lock_key: DEFAULT_SYNC_LOCK_KEY,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upstream.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.sync.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_errata_url_joins_slashes() {
        let upstream = UpstreamConfig {
            address: "http://vmaas:8080/".to_string(),
            errata_path: "/api/v3/errata".to_string(),
            ..Default::default()
        };
        assert_eq!(upstream.errata_url(), "http://vmaas:8080/api/v3/errata");
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let upstream = UpstreamConfig {
            retry_backoff_ms: 1_000,
            request_timeout_secs: 10,
            max_retries: 3,
            ..Default::default()
        };
        assert_eq!(upstream.backoff_for(1), Duration::from_secs(1));
        assert_eq!(upstream.backoff_for(3), Duration::from_secs(4));
        assert_eq!(upstream.backoff_for(10), MAX_RETRY_BACKOFF);
        assert_eq!(upstream.backoff_for(40), MAX_RETRY_BACKOFF);

        // 4 requests of 10s plus 1s + 2s + 4s of backoff
        assert_eq!(upstream.page_deadline(), Duration::from_secs(47));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = Config::default();
        config.upstream.page_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SYNC_PAGE_SIZE"));
    }

    #[test]
    fn test_validate_rejects_non_http_address() {
        let mut config = Config::default();
        config.upstream.address = "ftp://vmaas".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        std::env::set_var("VMAAS_ADDRESS", "https://vmaas.example.com");
        std::env::set_var("SYNC_PAGE_SIZE", "25");
        std::env::set_var("SYNC_INCREMENTAL", "true");
        std::env::set_var("SYNC_CHUNK_SIZE", "not-a-number");

        let config = Config::load().unwrap();
        assert_eq!(config.upstream.address, "https://vmaas.example.com");
        assert_eq!(config.upstream.page_size, 25);
        assert!(config.sync.incremental);
        assert_eq!(config.sync.chunk_size, DEFAULT_CHUNK_SIZE);

        std::env::remove_var("VMAAS_ADDRESS");
        std::env::remove_var("SYNC_PAGE_SIZE");
        std::env::remove_var("SYNC_INCREMENTAL");
        std::env::remove_var("SYNC_CHUNK_SIZE");
    }
}
