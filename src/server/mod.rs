//! HTTP server for serve mode
//!
//! Exposes the token provider over a small REST surface so external tools can
//! request tokens without embedding the crate.

pub mod app;
pub mod handlers;

pub use app::{AppState, create_app};
