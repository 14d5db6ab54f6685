use serde::Deserialize;
use std::time::Duration;

use crate::models::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Base URL of the remote ERP REST API.
    pub api_base_url: String,
    /// Sent as `X-Tenant-Id` on every store request.
    pub tenant_id: String,
    pub request_timeout_secs: u64,
    /// Delay between the last keystroke and the search it triggers.
    pub debounce_ms: u64,
    pub default_page_size: u32,
    /// How long a duplicate-check outcome is reused by the sidecar.
    pub duplicate_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            api_base_url: std::env::var("API_BASE_URL")
                .or_else(|_| std::env::var("ERP_API_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("API_BASE_URL or ERP_API_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("API_BASE_URL cannot be empty");
                    }
                    let parsed = url::Url::parse(&url)
                        .map_err(|e| anyhow::anyhow!("API_BASE_URL is not a valid URL: {}", e))?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("API_BASE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            tenant_id: std::env::var("TENANT_ID")
                .map_err(|_| anyhow::anyhow!("TENANT_ID environment variable required"))
                .and_then(|tenant| {
                    if tenant.trim().is_empty() {
                        anyhow::bail!("TENANT_ID cannot be empty");
                    }
                    Ok(tenant)
                })?,
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REQUEST_TIMEOUT_SECS must be a number of seconds"))?,
            debounce_ms: std::env::var("SEARCH_DEBOUNCE_MS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SEARCH_DEBOUNCE_MS must be a number"))
                .and_then(|ms: u64| {
                    if ms > 5_000 {
                        anyhow::bail!("SEARCH_DEBOUNCE_MS must not exceed 5000");
                    }
                    Ok(ms)
                })?,
            default_page_size: std::env::var("DEFAULT_PAGE_SIZE")
                .unwrap_or_else(|_| DEFAULT_PAGE_SIZE.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_PAGE_SIZE must be a number"))
                .and_then(|size: u32| {
                    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
                        anyhow::bail!(
                            "DEFAULT_PAGE_SIZE must be between {} and {}",
                            MIN_PAGE_SIZE,
                            MAX_PAGE_SIZE
                        );
                    }
                    Ok(size)
                })?,
            duplicate_cache_ttl_secs: std::env::var("DUPLICATE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DUPLICATE_CACHE_TTL_SECS must be a number"))?,
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("API base URL: {}", config.api_base_url);
        tracing::debug!("Tenant: {}", config.tenant_id);
        tracing::debug!(
            "Search debounce: {}ms, default page size: {}",
            config.debounce_ms,
            config.default_page_size
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn duplicate_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.duplicate_cache_ttl_secs)
    }
}
