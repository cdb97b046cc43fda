//! External token provider
//!
//! Unified acquisition facade tried in fixed priority order: a manually
//! configured token, the internal sandbox-backed generator, then a remote
//! token server with a single-slot cache. Token issuance is best effort;
//! every strategy failure falls through or degrades to `None` instead of
//! surfacing to the caller.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::broker::TokenBroker;
use crate::config::settings::ProviderSettings;
use crate::error::Result;
use crate::types::{CacheEntry, PotRequest, PotResponse};

/// Runtime-mutable provider configuration
#[derive(Debug, Clone, Default)]
struct RuntimeConfig {
    server_url: Option<String>,
    manual_token: Option<(String, String)>,
    use_internal_generator: bool,
}

/// Best-effort token acquisition across the three configured strategies
pub struct TokenProvider {
    config: RwLock<RuntimeConfig>,
    cache: Mutex<Option<CacheEntry>>,
    broker: Option<Arc<TokenBroker>>,
    client: reqwest::Client,
    cache_ttl: ChronoDuration,
}

impl TokenProvider {
    /// Create a provider from settings, optionally backed by a broker for the
    /// internal-generator strategy
    pub fn new(settings: &ProviderSettings, broker: Option<Arc<TokenBroker>>) -> Result<Self> {
        let manual_token = match (&settings.manual_po_token, &settings.manual_visitor_data) {
            (Some(token), Some(visitor)) => Some((token.clone(), visitor.clone())),
            _ => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout))
            .build()?;

        Ok(Self {
            config: RwLock::new(RuntimeConfig {
                server_url: settings.server_url.clone(),
                manual_token,
                use_internal_generator: settings.use_internal_generator,
            }),
            cache: Mutex::new(None),
            broker,
            client,
            cache_ttl: ChronoDuration::hours(settings.cache_ttl_hours),
        })
    }

    /// Acquire a token for the request, or `None` when no strategy can serve it
    pub async fn get_po_token(&self, request: &PotRequest) -> Option<PotResponse> {
        if let Some(response) = self.from_manual_override() {
            debug!("serving manually configured token");
            return Some(response);
        }

        if let Some(response) = self.from_internal_generator(request).await {
            return Some(response);
        }

        self.from_remote_server(request).await
    }

    /// True when at least one strategy is configured
    pub fn is_available(&self) -> bool {
        let config = self.config.read().expect("config lock poisoned");
        config.manual_token.is_some()
            || (config.use_internal_generator && self.broker.is_some())
            || config.server_url.is_some()
    }

    /// Install a manual token override and invalidate the cache
    pub async fn set_manual_token(
        &self,
        token: impl Into<String>,
        visitor_data: impl Into<String>,
    ) {
        self.config
            .write()
            .expect("config lock poisoned")
            .manual_token = Some((token.into(), visitor_data.into()));
        self.clear_cache().await;
    }

    /// Remove the manual token override
    pub fn clear_manual_token(&self) {
        self.config
            .write()
            .expect("config lock poisoned")
            .manual_token = None;
    }

    /// Point the remote-server strategy at a new URL (or disable it)
    pub fn set_server_url(&self, url: Option<String>) {
        self.config.write().expect("config lock poisoned").server_url = url;
    }

    /// Toggle the internal sandbox-backed generator
    pub fn set_internal_generator_enabled(&self, enabled: bool) {
        self.config
            .write()
            .expect("config lock poisoned")
            .use_internal_generator = enabled;
    }

    /// Drop whatever the single-slot cache holds
    pub async fn clear_cache(&self) {
        *self.cache.lock().await = None;
    }

    fn from_manual_override(&self) -> Option<PotResponse> {
        let config = self.config.read().expect("config lock poisoned");
        config
            .manual_token
            .as_ref()
            .map(|(token, visitor_data)| PotResponse::new(token, visitor_data))
    }

    async fn from_internal_generator(&self, request: &PotRequest) -> Option<PotResponse> {
        let enabled = self
            .config
            .read()
            .expect("config lock poisoned")
            .use_internal_generator;
        if !enabled {
            return None;
        }
        let broker = self.broker.as_ref()?;
        let video_id = request.video_id.as_deref()?;

        let session_id = request.visitor_data.as_deref().unwrap_or("");
        match broker.get_token(video_id, session_id).await {
            Ok(Some(result)) => Some(
                PotResponse::new(result.player_token, session_id)
                    .with_streaming_po_token(result.streaming_token),
            ),
            Ok(None) => {
                debug!("internal generator unavailable, falling through");
                None
            }
            Err(e) => {
                warn!(error = %e, "internal generator failed, falling through");
                None
            }
        }
    }

    /// Remote-server strategy. The cache lock is held across the POST so
    /// concurrent callers do not stampede the server.
    async fn from_remote_server(&self, request: &PotRequest) -> Option<PotResponse> {
        let server_url = self
            .config
            .read()
            .expect("config lock poisoned")
            .server_url
            .clone()?;

        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.as_ref()
            && entry.is_fresh(Utc::now())
        {
            debug!("serving cached server token");
            return Some(entry.response.clone());
        }

        let url = format!("{}/get_pot", server_url.trim_end_matches('/'));
        let response = match self.fetch_from_server(&url, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, %url, "token server request failed");
                return None;
            }
        };

        let expires_at = response
            .expires_at_utc()
            .unwrap_or_else(|| Utc::now() + self.cache_ttl);
        *cache = Some(CacheEntry::new(response.clone(), expires_at));

        Some(response)
    }

    async fn fetch_from_server(&self, url: &str, request: &PotRequest) -> Result<PotResponse> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server_url: Option<String>) -> ProviderSettings {
        ProviderSettings {
            server_url,
            use_internal_generator: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_manual_override_serves_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = TokenProvider::new(&settings(Some(server.uri())), None).unwrap();
        provider.set_manual_token("T", "V").await;

        let response = provider
            .get_po_token(&PotRequest::new().with_video_id("vid"))
            .await
            .unwrap();
        assert_eq!(response.po_token, "T");
        assert_eq!(response.visitor_data, "V");
    }

    #[tokio::test]
    async fn test_server_path_caches_until_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_pot"))
            .and(body_string_contains("dQw4w9WgXcQ"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "poToken": "server-token",
                "visitorData": "server-visitor",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TokenProvider::new(&settings(Some(server.uri())), None).unwrap();
        let request = PotRequest::new().with_video_id("dQw4w9WgXcQ");

        let first = provider.get_po_token(&request).await.unwrap();
        let second = provider.get_po_token(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.po_token, "server-token");
    }

    #[tokio::test]
    async fn test_server_path_refetches_after_expiry() {
        let server = MockServer::start().await;
        // Already-expired timestamp forces a fresh POST on the next call
        Mock::given(method("POST"))
            .and(path("/get_pot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "poToken": "short-lived",
                "visitorData": "v",
                "expiresAt": 1_000_i64,
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = TokenProvider::new(&settings(Some(server.uri())), None).unwrap();
        let request = PotRequest::new();
        provider.get_po_token(&request).await.unwrap();
        provider.get_po_token(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_failure_degrades_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = TokenProvider::new(&settings(Some(server.uri())), None).unwrap();
        assert!(provider.get_po_token(&PotRequest::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_no_strategy_configured() {
        let provider = TokenProvider::new(&settings(None), None).unwrap();
        assert!(!provider.is_available());
        assert!(provider.get_po_token(&PotRequest::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_set_manual_token_clears_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_pot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "poToken": "server-token",
                "visitorData": "v",
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = TokenProvider::new(&settings(Some(server.uri())), None).unwrap();
        provider.get_po_token(&PotRequest::new()).await.unwrap();

        provider.set_manual_token("T", "V").await;
        provider.clear_manual_token();

        // Cache was dropped with the override, so this POSTs again
        provider.get_po_token(&PotRequest::new()).await.unwrap();
    }
}
