//! WhatsApp Web version resolution.
//!
//! The protocol handshake advertises a client version triple, and stale
//! versions get rejected by the server. The current one is published in the
//! `client_revision` field of WhatsApp Web's service worker script. We fetch
//! it with a short timeout, cache it for a while, and fall back to the
//! configured triple so resolution can never stall or fail a connect.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zapmux_core::config::WhatsAppConfig;
use zapmux_core::types::ProtocolVersion;
use zapmux_core::ZapError;

const SW_URL: &str = "https://web.whatsapp.com/sw.js";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

struct CachedVersion {
    version: ProtocolVersion,
    fetched_at: Instant,
}

/// Resolves the current protocol version with a TTL cache.
///
/// `resolve` is infallible: a failed or slow fetch degrades to the last
/// cached value, then to the configured fallback.
pub struct VersionResolver {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    fallback: ProtocolVersion,
    override_version: Option<ProtocolVersion>,
    cached: Mutex<Option<CachedVersion>>,
}

impl VersionResolver {
    pub fn new(config: &WhatsAppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.version_fetch_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http,
            url: SW_URL.to_string(),
            ttl: Duration::from_secs(config.version_ttl_secs),
            fallback: config.version_fallback.into(),
            override_version: None,
            cached: Mutex::new(None),
        }
    }

    /// Always resolve to the given version and never touch the network.
    /// Operator escape hatch for when the published revision is broken.
    pub fn pinned(version: ProtocolVersion) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: SW_URL.to_string(),
            ttl: Duration::from_secs(3600),
            fallback: version,
            override_version: Some(version),
            cached: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Resolve the version to advertise on the next connect.
    ///
    /// The cache lock is never held across the network fetch, so concurrent
    /// callers each complete within the fetch timeout instead of queueing
    /// behind one slow request. An expired cache may fetch more than once
    /// under concurrency; the duplicates all store the same value.
    pub async fn resolve(&self) -> ProtocolVersion {
        if let Some(version) = self.override_version {
            return version;
        }

        if let Some(version) = self.fresh_cached().await {
            return version;
        }

        match self.fetch().await {
            Ok(version) => {
                debug!(%version, "fetched current WhatsApp Web version");
                *self.cached.lock().await = Some(CachedVersion {
                    version,
                    fetched_at: Instant::now(),
                });
                version
            }
            Err(e) => {
                // Stale cache beats the static fallback.
                let version = self
                    .cached
                    .lock()
                    .await
                    .as_ref()
                    .map(|entry| entry.version)
                    .unwrap_or(self.fallback);
                warn!("version fetch failed ({e}), using {version}");
                version
            }
        }
    }

    async fn fresh_cached(&self) -> Option<ProtocolVersion> {
        self.cached
            .lock()
            .await
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.version)
    }

    async fn fetch(&self) -> Result<ProtocolVersion, ZapError> {
        let body = self
            .http
            .get(&self.url)
            .header("user-agent", USER_AGENT)
            .header("sec-fetch-site", "none")
            .send()
            .await
            .map_err(|e| ZapError::Protocol(format!("sw.js request failed: {e}")))?
            .text()
            .await
            .map_err(|e| ZapError::Protocol(format!("sw.js body unreadable: {e}")))?;

        parse_sw_js(&body)
            .ok_or_else(|| ZapError::Protocol("no client_revision in sw.js".to_string()))
    }
}

/// Extract the version triple from the service worker script.
///
/// The script carries `client_revision` (quoted or bare); the revision slots
/// into the tertiary position of the `2.3000.x` scheme WhatsApp Web uses.
pub fn parse_sw_js(body: &str) -> Option<ProtocolVersion> {
    let offset = body.find("client_revision")?;
    let digits: String = body[offset..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let revision = digits.parse::<u32>().ok()?;
    Some(ProtocolVersion::new(2, 3000, revision))
}
