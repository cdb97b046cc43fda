//! Remote attestation service client
//!
//! Thin HTTP client for the two attestation endpoints: `Create`, which hands
//! out a scrambled challenge program, and `GenerateIT`, which exchanges a
//! solved challenge for an integrity token. Both speak a JSON-array protobuf
//! dialect and are called with a fixed browser identity.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tracing::debug;

use crate::config::settings::AttestationSettings;
use crate::error::{Error, Result};

/// Client for the remote attestation service
#[derive(Debug, Clone)]
pub struct AttestationClient {
    client: reqwest::Client,
    base_url: String,
    request_key: String,
}

impl AttestationClient {
    /// Create a new attestation client from settings
    pub fn new(settings: &AttestationSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json+protobuf"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|e| Error::config("user_agent", &e.to_string()))?,
        );
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&settings.api_key)
                .map_err(|e| Error::config("api_key", &e.to_string()))?,
        );
        headers.insert(
            "x-user-agent",
            HeaderValue::from_static("grpc-web-javascript/0.1"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(settings.connect_timeout))
            .timeout(Duration::from_secs(settings.request_timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            request_key: settings.request_key.clone(),
        })
    }

    /// Fetch raw challenge data from the `Create` endpoint
    pub async fn create_challenge(&self) -> Result<String> {
        let url = format!("{}/Create", self.base_url);
        debug!(url = %url, "requesting attestation challenge");

        let body = serde_json::to_string(&serde_json::json!([self.request_key]))?;
        let response = self.client.post(&url).body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::challenge(
                "create".to_string(),
                format!("attestation server returned {}", status),
            ));
        }

        Ok(response.text().await?)
    }

    /// Exchange a solved challenge for raw integrity token data via `GenerateIT`
    pub async fn generate_integrity_token(&self, challenge_response: &str) -> Result<String> {
        let url = format!("{}/GenerateIT", self.base_url);
        debug!(url = %url, "requesting integrity token");

        let body =
            serde_json::to_string(&serde_json::json!([self.request_key, challenge_response]))?;
        let response = self.client.post(&url).body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::challenge(
                "integrity_token".to_string(),
                format!("attestation server returned {}", status),
            ));
        }

        Ok(response.text().await?)
    }
}
