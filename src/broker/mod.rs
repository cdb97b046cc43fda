//! Token broker
//!
//! Guards at most one live [`ChallengeExecutor`] per process and decides when
//! it must be replaced. All executor bookkeeping happens under one async
//! mutex; token derivation runs outside it so a slow derivation never blocks
//! other callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::attestation::AttestationClient;
use crate::config::settings::BrokerSettings;
use crate::error::{Error, Result};
use crate::executor::ChallengeExecutor;
use crate::sandbox::EngineFactory;
use crate::types::TokenResult;

/// The executor currently bound to a session, with its once-per-lifetime
/// streaming token
struct ChallengeState {
    executor: Arc<ChallengeExecutor>,
    session_id: String,
    streaming_token: String,
}

/// Single point of truth for executor lifecycle and the retry policy
pub struct TokenBroker {
    factory: Arc<dyn EngineFactory>,
    attestation: AttestationClient,
    settings: BrokerSettings,
    state: Mutex<Option<ChallengeState>>,
    disabled: AtomicBool,
}

impl TokenBroker {
    /// Create a new broker. No executor exists until the first token request.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        attestation: AttestationClient,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            factory,
            attestation,
            settings,
            state: Mutex::new(None),
            disabled: AtomicBool::new(false),
        }
    }

    /// True once a defective sandbox has permanently disabled this broker
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Acquire a player and streaming token for `(video_id, session_id)`.
    ///
    /// Returns `Ok(None)` when the sandbox has been found structurally
    /// defective; that state is sticky for the process lifetime. Other
    /// failures propagate after the single internal retry.
    pub async fn get_token(&self, video_id: &str, session_id: &str) -> Result<Option<TokenResult>> {
        if self.is_disabled() {
            return Ok(None);
        }

        match self.get_token_inner(video_id, session_id).await {
            Ok(result) => Ok(Some(result)),
            Err(e) if e.is_bad_environment() => {
                warn!(error = %e, "sandbox unusable, disabling internal token generation");
                self.disabled.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_token_inner(&self, video_id: &str, session_id: &str) -> Result<TokenResult> {
        let (executor, streaming_token, recreated) = self.acquire(session_id, false).await?;

        // Callers without a video just want the session-wide token
        if video_id.is_empty() {
            return Ok(TokenResult::new("", streaming_token));
        }

        match executor.generate(video_id).await {
            Ok(player_token) => Ok(TokenResult::new(player_token, streaming_token)),
            Err(e) if recreated => Err(e),
            Err(e) if e.is_bad_environment() => Err(e),
            Err(e) => {
                warn!(error = %e, %video_id, "derivation failed, recreating executor once");
                let (executor, streaming_token, _) = self.acquire(session_id, true).await?;
                let player_token = executor.generate(video_id).await?;
                Ok(TokenResult::new(player_token, streaming_token))
            }
        }
    }

    /// Ensure a usable executor for `session_id` and hand out a reference.
    ///
    /// The returned flag is true only when recreation happened in this call.
    async fn acquire(
        &self,
        session_id: &str,
        force: bool,
    ) -> Result<(Arc<ChallengeExecutor>, String, bool)> {
        let mut state = self.state.lock().await;

        let must_recreate = force
            || match state.as_ref() {
                None => true,
                Some(current) => {
                    current.executor.is_expired() || current.session_id != session_id
                }
            };

        if !must_recreate {
            let current = state.as_ref().expect("checked above");
            return Ok((
                Arc::clone(&current.executor),
                current.streaming_token.clone(),
                false,
            ));
        }

        if let Some(previous) = state.take() {
            self.close_previous(previous).await;
        }

        info!(%session_id, "creating challenge executor");
        let create_timeout = Duration::from_secs(self.settings.create_timeout);
        let executor = timeout(
            create_timeout,
            ChallengeExecutor::create(
                Arc::clone(&self.factory),
                &self.attestation,
                &self.settings,
            ),
        )
        .await
        .map_err(|_| Error::timeout("executor initialization", self.settings.create_timeout))??;
        let executor = Arc::new(executor);

        // The session token is the first derivation on every fresh executor
        let streaming_token = executor.generate(session_id).await?;

        *state = Some(ChallengeState {
            executor: Arc::clone(&executor),
            session_id: session_id.to_string(),
            streaming_token: streaming_token.clone(),
        });

        Ok((executor, streaming_token, true))
    }

    /// Close a superseded executor with a bounded wait. A close that does not
    /// finish in time is abandoned, not retried.
    async fn close_previous(&self, previous: ChallengeState) {
        let close_timeout = Duration::from_secs(self.settings.close_timeout);
        match timeout(close_timeout, previous.executor.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "previous executor close failed"),
            Err(_) => warn!(
                timeout_secs = self.settings.close_timeout,
                "previous executor close timed out, abandoning"
            ),
        }
    }
}
