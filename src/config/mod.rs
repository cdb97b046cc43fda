//! Configuration management for the token broker
//!
//! This module handles loading and managing configuration settings
//! for both serve and generate modes.

pub mod settings;

pub use settings::Settings;
