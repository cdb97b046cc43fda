//! Shared test infrastructure
//!
//! Provides a scriptable mock engine standing in for a real sandboxed script
//! engine, plus wiremock fixtures for the attestation endpoints.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use po_token_broker::config::settings::{AttestationSettings, BrokerSettings};
use po_token_broker::executor::ChallengeExecutor;
use po_token_broker::sandbox::{EngineFactory, SandboxEvent, ScriptEngine};
use po_token_broker::{Result, TokenBroker};
use po_token_broker::attestation::AttestationClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Counters and failure switches shared between a test and its mock engines
#[derive(Default)]
pub struct MockState {
    /// Engines constructed so far; each construction is one handshake
    pub handshakes: AtomicUsize,
    /// Derivations requested so far, across all engine instances
    pub derivations: AtomicUsize,
    /// Refuse engine construction entirely
    pub fail_construction: AtomicBool,
    /// Report an uncaught console error instead of solving the challenge
    pub broken_console: AtomicBool,
    /// Fail the nth derivation (1-based); 0 disables
    pub fail_derivation_at: AtomicUsize,
    /// Accept derivations but never answer them
    pub stall_derivations: AtomicBool,
}

impl MockState {
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn derivation_count(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    pub fn fail_derivation(&self, nth: usize) {
        self.fail_derivation_at.store(nth, Ordering::SeqCst);
    }
}

/// Script-sniffing engine: recognizes the harness scripts by their entry
/// points and emits the events a real page would
pub struct MockEngine {
    events: mpsc::UnboundedSender<SandboxEvent>,
    state: Arc<MockState>,
    handshake: usize,
}

impl ScriptEngine for MockEngine {
    fn load_page(&mut self, html: &str) -> Result<()> {
        assert!(
            html.contains("sandbox.notifyBootstrap();"),
            "page loaded without a bootstrap call"
        );
        let _ = self.events.send(SandboxEvent::BootstrapRequested);
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> Result<()> {
        if script.contains("runBotGuard") {
            if self.state.broken_console.load(Ordering::SeqCst) {
                let _ = self.events.send(SandboxEvent::UncaughtConsoleError {
                    message: "Uncaught TypeError: vm.a is not a function".to_string(),
                });
            } else {
                let _ = self.events.send(SandboxEvent::ChallengeSolved {
                    response: "solved-response".to_string(),
                });
            }
        } else if script.contains("obtainPoToken") {
            if self.state.stall_derivations.load(Ordering::SeqCst) {
                // The page never calls back; the waiter stays pending
                return Ok(());
            }
            let identifier = extract_identifier(script);
            let n = self.state.derivations.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.state.fail_derivation_at.load(Ordering::SeqCst) {
                let _ = self.events.send(SandboxEvent::TokenError {
                    identifier,
                    message: "PMD:Undefined".to_string(),
                });
            } else {
                let value = token_bytes(&identifier, self.handshake);
                let _ = self.events.send(SandboxEvent::TokenComputed { identifier, value });
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory handing out [`MockEngine`]s bound to one shared [`MockState`]
pub struct MockEngineFactory {
    pub state: Arc<MockState>,
}

impl MockEngineFactory {
    pub fn new() -> (Arc<Self>, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Arc::new(Self {
                state: Arc::clone(&state),
            }),
            state,
        )
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(
        &self,
        events: mpsc::UnboundedSender<SandboxEvent>,
    ) -> std::result::Result<Box<dyn ScriptEngine>, String> {
        if self.state.fail_construction.load(Ordering::SeqCst) {
            return Err("engine binary not available".to_string());
        }
        let handshake = self.state.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockEngine {
            events,
            state: Arc::clone(&self.state),
            handshake,
        }))
    }
}

fn extract_identifier(script: &str) -> String {
    let start = script
        .find("identifier = \"")
        .expect("derive script without identifier")
        + "identifier = \"".len();
    let end = script[start..]
        .find('"')
        .expect("unterminated identifier literal");
    script[start..start + end].to_string()
}

/// Deterministic per-identifier token, distinct across handshakes
fn token_bytes(identifier: &str, handshake: usize) -> String {
    format!("mock-token-{}-h{}", identifier, handshake)
        .as_bytes()
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Mount Create/GenerateIT fixtures with a 2-hour token expiration
pub async fn mount_attestation(server: &MockServer) {
    mount_attestation_with_expiration(server, 7200).await;
}

/// Mount Create/GenerateIT fixtures with a chosen expiration in seconds
pub async fn mount_attestation_with_expiration(server: &MockServer, expiration_secs: u64) {
    Mock::given(method("POST"))
        .and(path("/Create"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"["ignored",["msg-1",[null,"interpreter-src"],[],"hash","prog","bg",null,"blob"]]"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/GenerateIT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"["integrity-token",{}]"#, expiration_secs)),
        )
        .mount(server)
        .await;
}

/// Broker wired to a mock engine and the given attestation fixture server
pub fn broker_with_mocks(
    factory: Arc<MockEngineFactory>,
    attestation_url: &str,
) -> TokenBroker {
    let attestation = AttestationClient::new(&AttestationSettings {
        base_url: attestation_url.to_string(),
        ..Default::default()
    })
    .expect("attestation client");

    TokenBroker::new(factory, attestation, BrokerSettings::default())
}

/// Ready executor wired to a mock engine and the given attestation fixture
/// server
pub async fn executor_with_mocks(
    factory: Arc<MockEngineFactory>,
    attestation_url: &str,
) -> ChallengeExecutor {
    let attestation = AttestationClient::new(&AttestationSettings {
        base_url: attestation_url.to_string(),
        ..Default::default()
    })
    .expect("attestation client");

    ChallengeExecutor::create(factory, &attestation, &BrokerSettings::default())
        .await
        .expect("executor handshake")
}
