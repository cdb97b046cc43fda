//! PO Token Broker
//!
//! A proof-of-origin (PO) token broker. Tokens are attestation artifacts the
//! remote media service requires before it authorizes streaming requests;
//! this crate performs the remote-attestation handshake inside a sandboxed
//! script engine, derives per-video and per-session tokens from it, and
//! offers fallback strategies when no sandbox is available.
//!
//! # Architecture
//!
//! - [`sandbox`] hosts a caller-supplied script engine on a dedicated worker
//!   thread (engines are not safe to touch from arbitrary threads).
//! - [`executor`] drives the Create/GenerateIT attestation handshake in the
//!   sandbox and derives tokens per identifier.
//! - [`broker`] guards at most one live executor per process, recreates it
//!   when it expires or the session changes, and retries a failed derivation
//!   exactly once.
//! - [`provider`] is the outward facade: manual override, the internal
//!   broker, then a remote token server with a single-slot cache.
//!
//! The sandboxed engine itself is not part of this crate; embedders supply
//! one through [`sandbox::EngineFactory`].
//!
//! # Example
//!
//! ```rust
//! use po_token_broker::{Settings, provider::TokenProvider};
//!
//! # fn example() -> anyhow::Result<()> {
//! let settings = Settings::default();
//! let provider = TokenProvider::new(&settings.provider, None)?;
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod provider;
pub mod sandbox;
pub mod server;
pub mod types;

pub use broker::TokenBroker;
pub use config::Settings;
pub use error::{Error, Result};
pub use provider::TokenProvider;
pub use sandbox::{EngineFactory, SandboxEvent, ScriptEngine};
pub use types::{ErrorResponse, PingResponse, PotRequest, PotResponse, TokenResult};
