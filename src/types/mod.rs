//! Type definitions for the token broker
//!
//! Domain results returned by the broker plus the JSON wire types shared by
//! the fallback-server client and the serve mode.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Result of a broker token acquisition for one `(video_id, session_id)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    /// Per-video token derived from the established handshake
    pub player_token: String,
    /// Session-wide token, generated exactly once per executor lifetime
    pub streaming_token: String,
}

impl TokenResult {
    /// Create a new token result
    pub fn new(player_token: impl Into<String>, streaming_token: impl Into<String>) -> Self {
        Self {
            player_token: player_token.into(),
            streaming_token: streaming_token.into(),
        }
    }
}

/// Request for a proof-of-origin token (fallback-server wire format)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PotRequest {
    /// Visitor data identifying the session
    #[serde(rename = "visitorData", skip_serializing_if = "Option::is_none")]
    pub visitor_data: Option<String>,

    /// Video identifier for content-bound tokens
    #[serde(rename = "videoId", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

impl PotRequest {
    /// Create a new request with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set visitor data
    pub fn with_visitor_data(mut self, visitor_data: impl Into<String>) -> Self {
        self.visitor_data = Some(visitor_data.into());
        self
    }

    /// Set video identifier
    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }
}

/// Proof-of-origin token response (fallback-server wire format)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotResponse {
    /// The proof-of-origin token
    #[serde(rename = "poToken")]
    pub po_token: String,

    /// Visitor data the token is bound to
    #[serde(rename = "visitorData")]
    pub visitor_data: String,

    /// Streaming token, when the producing strategy has one
    #[serde(rename = "streamingPoToken", skip_serializing_if = "Option::is_none")]
    pub streaming_po_token: Option<String>,

    /// Expiration as unix epoch milliseconds
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl PotResponse {
    /// Create a new response without streaming token or expiry
    pub fn new(po_token: impl Into<String>, visitor_data: impl Into<String>) -> Self {
        Self {
            po_token: po_token.into(),
            visitor_data: visitor_data.into(),
            streaming_po_token: None,
            expires_at: None,
        }
    }

    /// Set the streaming token
    pub fn with_streaming_po_token(mut self, token: impl Into<String>) -> Self {
        self.streaming_po_token = Some(token.into());
        self
    }

    /// Set the expiration timestamp (epoch milliseconds)
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expiration as a `DateTime<Utc>`, if present and representable
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Single most-recent cache slot for the provider's remote-server path.
/// Stale entries are only detected lazily on the next read.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached server response
    pub response: PotResponse,
    /// When the slot stops being served
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(response: PotResponse, expires_at: DateTime<Utc>) -> Self {
        Self {
            response,
            expires_at,
        }
    }

    /// Check whether the slot is still valid at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Ping response for health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    /// Server uptime in seconds
    pub server_uptime: u64,

    /// Server version
    pub version: String,
}

impl PingResponse {
    /// Create a new ping response
    pub fn new(server_uptime: u64, version: impl Into<String>) -> Self {
        Self {
            server_uptime,
            version: version.into(),
        }
    }
}

/// Error response for API errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            context: None,
        }
    }

    /// Create error response with context
    pub fn with_context(error: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            context: Some(context.into()),
        }
    }
}
