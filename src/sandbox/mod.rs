//! Sandboxed script engine host
//!
//! The script engine implementations this crate drives are not thread safe:
//! an engine instance must be created, used and destroyed on one thread. The
//! [`SandboxHost`] owns such an engine on a dedicated worker thread and
//! exposes an async command surface to the rest of the crate. Everything the
//! page does (solving the challenge, emitting tokens, crashing) flows back as
//! [`SandboxEvent`]s on an unbounded channel.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Event emitted by the hosted page back to the driving executor
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    /// The page finished loading and is ready to run the challenge program
    BootstrapRequested,
    /// The challenge program produced a response to exchange for an
    /// integrity token
    ChallengeSolved {
        /// Raw challenge response
        response: String,
    },
    /// A token derivation finished for the given identifier
    TokenComputed {
        /// Identifier the derivation was keyed on
        identifier: String,
        /// Comma separated byte values of the raw token
        value: String,
    },
    /// A token derivation failed for the given identifier
    TokenError {
        /// Identifier the derivation was keyed on
        identifier: String,
        /// Error reported by the page
        message: String,
    },
    /// A script evaluation failed inside the engine
    RuntimeError {
        /// Error reported by the engine
        message: String,
    },
    /// The page logged an uncaught error to the console. Marks the whole
    /// engine implementation as defective.
    UncaughtConsoleError {
        /// The console message
        message: String,
    },
}

/// A script engine instance pinned to the worker thread that created it.
///
/// Deliberately not `Send`: implementations may wrap thread-affine handles.
pub trait ScriptEngine {
    /// Load an HTML page into the engine
    fn load_page(&mut self, html: &str) -> Result<()>;

    /// Evaluate a script in the context of the loaded page
    fn evaluate(&mut self, script: &str) -> Result<()>;

    /// Tear the engine down
    fn close(&mut self) -> Result<()>;
}

/// Factory invoked on the worker thread to construct the engine.
///
/// Construction failure means the host environment cannot run a sandbox at
/// all and is reported as [`Error::BadEnvironment`].
pub trait EngineFactory: Send + Sync + 'static {
    /// Build an engine that reports page callbacks on `events`
    fn create(
        &self,
        events: mpsc::UnboundedSender<SandboxEvent>,
    ) -> std::result::Result<Box<dyn ScriptEngine>, String>;
}

/// Commands accepted by the sandbox worker
enum SandboxCommand {
    LoadPage {
        html: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Evaluate {
        script: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Close {
        respond_to: oneshot::Sender<Result<()>>,
    },
}

/// Async handle to an engine living on its own worker thread
pub struct SandboxHost {
    command_tx: mpsc::UnboundedSender<SandboxCommand>,
}

impl SandboxHost {
    /// Spawn a worker thread and construct an engine on it.
    ///
    /// Returns the host handle, the event stream for the hosted page, and a
    /// readiness channel that resolves once engine construction has either
    /// succeeded or failed.
    pub fn spawn(
        factory: Arc<dyn EngineFactory>,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<SandboxEvent>,
        oneshot::Receiver<Result<()>>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::spawn(move || {
            worker_loop(factory, events_tx, command_rx, ready_tx);
        });

        (Self { command_tx }, events_rx, ready_rx)
    }

    /// Load an HTML page into the hosted engine
    pub async fn load_page(&self, html: String) -> Result<()> {
        self.send(|respond_to| SandboxCommand::LoadPage { html, respond_to })
            .await
    }

    /// Evaluate a script in the hosted engine
    pub async fn evaluate(&self, script: String) -> Result<()> {
        self.send(|respond_to| SandboxCommand::Evaluate { script, respond_to })
            .await
    }

    /// Tear the hosted engine down and stop the worker thread
    pub async fn close(&self) -> Result<()> {
        self.send(|respond_to| SandboxCommand::Close { respond_to })
            .await
    }

    async fn send<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> SandboxCommand,
    {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(make(tx))
            .map_err(|_| Error::challenge("sandbox", "sandbox worker terminated"))?;
        rx.await
            .map_err(|_| Error::challenge("sandbox", "sandbox worker terminated"))?
    }
}

impl Drop for SandboxHost {
    fn drop(&mut self) {
        // Best effort shutdown for hosts that were never explicitly closed
        let (tx, _rx) = oneshot::channel();
        let _ = self.command_tx.send(SandboxCommand::Close { respond_to: tx });
    }
}

fn worker_loop(
    factory: Arc<dyn EngineFactory>,
    events_tx: mpsc::UnboundedSender<SandboxEvent>,
    mut command_rx: mpsc::UnboundedReceiver<SandboxCommand>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let mut engine = match factory.create(events_tx) {
        Ok(engine) => {
            let _ = ready_tx.send(Ok(()));
            engine
        }
        Err(message) => {
            error!(%message, "sandbox engine construction failed");
            let _ = ready_tx.send(Err(Error::bad_environment(message)));
            return;
        }
    };

    debug!("sandbox worker started");

    while let Some(command) = command_rx.blocking_recv() {
        match command {
            SandboxCommand::LoadPage { html, respond_to } => {
                let _ = respond_to.send(engine.load_page(&html));
            }
            SandboxCommand::Evaluate { script, respond_to } => {
                let _ = respond_to.send(engine.evaluate(&script));
            }
            SandboxCommand::Close { respond_to } => {
                let result = engine.close();
                if let Err(ref e) = result {
                    warn!(error = %e, "sandbox engine close failed");
                }
                let _ = respond_to.send(result);
                break;
            }
        }
    }

    debug!("sandbox worker stopped");
}
