//! Challenge executor
//!
//! One executor owns one sandboxed page for the duration of a handshake. The
//! lifecycle is: spawn a sandbox, load the harness page, run the attestation
//! challenge inside it, exchange the solved challenge for an integrity token,
//! then serve any number of per-identifier token derivations until the
//! executor expires or is closed.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::attestation::AttestationClient;
use crate::config::settings::BrokerSettings;
use crate::error::{Error, Result};
use crate::sandbox::{EngineFactory, SandboxEvent, SandboxHost};

/// Harness page loaded into every sandbox
const PAGE_TEMPLATE: &str = include_str!("../../assets/potoken.html");

/// Offset applied per byte when descrambling challenge data
const DESCRAMBLE_OFFSET: u8 = 97;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<String>>>>>;

/// Sticky failure recorded by the event pump
#[derive(Debug, Clone)]
enum ExecutorFault {
    BadEnvironment(String),
    Runtime(String),
}

impl ExecutorFault {
    fn to_error(&self) -> Error {
        match self {
            Self::BadEnvironment(message) => Error::bad_environment(message.clone()),
            Self::Runtime(message) => Error::challenge("runtime", message),
        }
    }
}

/// A live attestation handshake serving token derivations
pub struct ChallengeExecutor {
    host: SandboxHost,
    expires_at: DateTime<Utc>,
    pending: PendingMap,
    fault: Arc<Mutex<Option<ExecutorFault>>>,
}

impl ChallengeExecutor {
    /// Run the full handshake and return a ready executor.
    ///
    /// Callers are expected to bound this with a timeout; the handshake makes
    /// two network round trips and waits on the sandbox in between.
    pub async fn create(
        factory: Arc<dyn EngineFactory>,
        attestation: &AttestationClient,
        settings: &BrokerSettings,
    ) -> Result<Self> {
        let (host, mut events, ready) = SandboxHost::spawn(factory);
        ready
            .await
            .map_err(|_| Error::challenge("sandbox", "sandbox worker terminated"))??;

        host.load_page(bootstrap_page()).await?;
        wait_for_bootstrap(&mut events).await?;

        let raw_challenge = attestation.create_challenge().await?;
        let challenge_data = parse_challenge_data(&raw_challenge)?;
        host.evaluate(run_challenge_script(&challenge_data)).await?;

        let challenge_response = wait_for_challenge_solved(&mut events).await?;
        debug!("challenge solved, requesting integrity token");

        let raw_integrity = attestation
            .generate_integrity_token(&challenge_response)
            .await?;
        let (integrity_token, expiration_secs) = parse_integrity_response(&raw_integrity)?;
        host.evaluate(set_integrity_token_script(&integrity_token))
            .await?;

        // The expiration is network input; an absurd value must fail the
        // handshake, not overflow the clock arithmetic
        let usable_secs = expiration_secs.saturating_sub(settings.expiry_margin);
        let expires_at = i64::try_from(usable_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::challenge(
                    "integrity_token".to_string(),
                    format!("unreasonable token expiration: {} seconds", expiration_secs),
                )
            })?;
        info!(%expires_at, "attestation handshake established");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let fault = Arc::new(Mutex::new(None));
        tokio::spawn(pump_events(events, Arc::clone(&pending), Arc::clone(&fault)));

        Ok(Self {
            host,
            expires_at,
            pending,
            fault,
        })
    }

    /// When the established handshake stops being usable
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True once the handshake has passed its usable lifetime
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Derive a token bound to `identifier`.
    ///
    /// One derivation per identifier may be in flight at a time.
    pub async fn generate(&self, identifier: &str) -> Result<String> {
        if let Some(fault) = self.fault.lock().expect("fault lock poisoned").as_ref() {
            return Err(fault.to_error());
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            match pending.entry(identifier.to_string()) {
                Entry::Occupied(_) => {
                    return Err(Error::challenge(
                        "derive".to_string(),
                        format!("derivation already in flight for '{}'", identifier),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
        }

        if let Err(e) = self.host.evaluate(derive_script(identifier)).await {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(identifier);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::challenge("derive", "executor closed during derivation"))?
    }

    /// Tear the sandbox down. Pending derivations fail as the worker stops.
    pub async fn close(&self) -> Result<()> {
        self.host.close().await
    }
}

/// Forward page events to waiting derivations until the sandbox goes away
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<SandboxEvent>,
    pending: PendingMap,
    fault: Arc<Mutex<Option<ExecutorFault>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SandboxEvent::TokenComputed { identifier, value } => {
                let result = u8_string_to_base64(&value);
                complete(&pending, &identifier, result);
            }
            SandboxEvent::TokenError {
                identifier,
                message,
            } => {
                complete(&pending, &identifier, Err(Error::challenge("derive", &message)));
            }
            SandboxEvent::UncaughtConsoleError { message } => {
                warn!(%message, "uncaught console error, marking sandbox defective");
                let recorded = ExecutorFault::BadEnvironment(message);
                *fault.lock().expect("fault lock poisoned") = Some(recorded.clone());
                fail_all(&pending, &recorded);
            }
            SandboxEvent::RuntimeError { message } => {
                warn!(%message, "sandbox runtime error");
                let recorded = ExecutorFault::Runtime(message);
                *fault.lock().expect("fault lock poisoned") = Some(recorded.clone());
                fail_all(&pending, &recorded);
            }
            SandboxEvent::BootstrapRequested | SandboxEvent::ChallengeSolved { .. } => {
                debug!("ignoring handshake event after handshake completion");
            }
        }
    }

    // Sandbox gone: nothing will complete the stragglers
    let drained: Vec<_> = pending
        .lock()
        .expect("pending lock poisoned")
        .drain()
        .collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(Error::challenge("derive", "sandbox closed")));
    }
}

fn complete(pending: &PendingMap, identifier: &str, result: Result<String>) {
    let sender = pending
        .lock()
        .expect("pending lock poisoned")
        .remove(identifier);
    match sender {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => warn!(%identifier, "token event without a waiting derivation"),
    }
}

fn fail_all(pending: &PendingMap, fault: &ExecutorFault) {
    let drained: Vec<_> = pending
        .lock()
        .expect("pending lock poisoned")
        .drain()
        .collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(fault.to_error()));
    }
}

async fn wait_for_bootstrap(events: &mut mpsc::UnboundedReceiver<SandboxEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Some(SandboxEvent::BootstrapRequested) => return Ok(()),
            Some(other) => handle_handshake_failure(other)?,
            None => return Err(Error::challenge("bootstrap", "sandbox closed during load")),
        }
    }
}

async fn wait_for_challenge_solved(
    events: &mut mpsc::UnboundedReceiver<SandboxEvent>,
) -> Result<String> {
    loop {
        match events.recv().await {
            Some(SandboxEvent::ChallengeSolved { response }) => return Ok(response),
            Some(other) => handle_handshake_failure(other)?,
            None => {
                return Err(Error::challenge(
                    "challenge",
                    "sandbox closed during challenge",
                ));
            }
        }
    }
}

/// Errors abort the handshake; stray benign events are skipped
fn handle_handshake_failure(event: SandboxEvent) -> Result<()> {
    match event {
        SandboxEvent::UncaughtConsoleError { message } => Err(Error::bad_environment(message)),
        SandboxEvent::RuntimeError { message } => Err(Error::challenge("handshake", &message)),
        other => {
            debug!(?other, "ignoring event during handshake");
            Ok(())
        }
    }
}

/// Harness page with the bootstrap notification spliced into its script block
fn bootstrap_page() -> String {
    PAGE_TEMPLATE.replacen("</script>", "\nsandbox.notifyBootstrap();</script>", 1)
}

fn run_challenge_script(challenge_data: &str) -> String {
    format!(
        r#"try {{
    data = JSON.parse(String.raw`{challenge_data}`);
    runBotGuard(data).then(function (result) {{
        this.webPoSignalOutput = result.webPoSignalOutput;
        sandbox.onChallengeSolved(result.botguardResponse);
    }});
}} catch (error) {{
    sandbox.onRuntimeError(error + "\n" + error.stack);
}}"#
    )
}

fn set_integrity_token_script(integrity_token: &str) -> String {
    format!("this.integrityToken = {integrity_token}")
}

fn derive_script(identifier: &str) -> String {
    let bytes = string_to_u8_list(identifier);
    format!(
        r#"try {{
    identifier = "{identifier}";
    u8Identifier = new Uint8Array([{bytes}]);
    poTokenU8 = obtainPoToken(webPoSignalOutput, integrityToken, u8Identifier);
    poTokenU8String = "";
    for (i = 0; i < poTokenU8.length; i++) {{
        if (i != 0) poTokenU8String += ",";
        poTokenU8String += poTokenU8[i];
    }}
    sandbox.onTokenComputed(identifier, poTokenU8String);
}} catch (error) {{
    sandbox.onTokenError(identifier, error.toString());
}}"#
    )
}

/// Normalize raw `Create` output into the object shape the harness expects.
///
/// The second array element is either the scrambled challenge as a string or
/// an already-plain array.
pub(crate) fn parse_challenge_data(raw: &str) -> Result<String> {
    let outer: Value = serde_json::from_str(raw)?;
    let outer = outer
        .as_array()
        .ok_or_else(|| Error::challenge("create", "challenge data is not an array"))?;

    let challenge: Value = match outer.get(1) {
        Some(Value::String(scrambled)) => serde_json::from_str(&descramble(scrambled)?)?,
        Some(plain @ Value::Array(_)) => plain.clone(),
        _ => {
            return Err(Error::challenge(
                "create",
                "challenge data carries no challenge element",
            ));
        }
    };
    let challenge = challenge
        .as_array()
        .ok_or_else(|| Error::challenge("create", "descrambled challenge is not an array"))?;

    let field = |index: usize, name: &str| -> Result<String> {
        challenge
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::challenge("create".to_string(), format!("missing field '{}'", name))
            })
    };

    let first_string = |index: usize| -> Option<String> {
        challenge
            .get(index)
            .and_then(Value::as_array)
            .and_then(|a| a.iter().find_map(|v| v.as_str().map(str::to_string)))
    };

    let normalized = serde_json::json!({
        "messageId": field(0, "messageId")?,
        "interpreterJavascript": {
            "privateDoNotAccessOrElseSafeScriptWrappedValue": first_string(1),
            "privateDoNotAccessOrElseTrustedResourceUrlWrappedValue": first_string(2),
        },
        "interpreterHash": field(3, "interpreterHash")?,
        "program": field(4, "program")?,
        "globalName": field(5, "globalName")?,
        "clientExperimentsStateBlob": field(7, "clientExperimentsStateBlob")?,
    });

    Ok(normalized.to_string())
}

/// Undo the byte-offset scrambling on base64-wrapped challenge data
pub(crate) fn descramble(scrambled: &str) -> Result<String> {
    let decoded = URL_SAFE_NO_PAD
        .decode(scrambled.trim_end_matches('='))
        .map_err(|e| {
            Error::challenge("create".to_string(), format!("invalid challenge base64: {}", e))
        })?;
    let shifted: Vec<u8> = decoded
        .iter()
        .map(|b| b.wrapping_add(DESCRAMBLE_OFFSET))
        .collect();
    String::from_utf8(shifted)
        .map_err(|_| Error::challenge("create", "descrambled challenge is not UTF-8"))
}

/// Split raw `GenerateIT` output into the token payload for the page and the
/// expiration in seconds
pub(crate) fn parse_integrity_response(raw: &str) -> Result<(String, u64)> {
    let parsed: Value = serde_json::from_str(raw)?;
    let array = parsed
        .as_array()
        .ok_or_else(|| Error::challenge("integrity_token", "response is not an array"))?;

    let expiration = array
        .get(1)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::challenge("integrity_token", "response carries no expiration"))?;

    Ok((serde_json::to_string(&parsed)?, expiration))
}

/// UTF-8 bytes of `s` as a comma separated list for embedding in a script
pub(crate) fn string_to_u8_list(s: &str) -> String {
    s.as_bytes()
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma separated byte list back into websafe base64
pub(crate) fn u8_string_to_base64(value: &str) -> Result<String> {
    let bytes = value
        .split(',')
        .map(|part| {
            part.trim().parse::<u8>().map_err(|_| {
                Error::challenge("derive".to_string(), format!("invalid byte value '{}'", part))
            })
        })
        .collect::<Result<Vec<u8>>>()?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
