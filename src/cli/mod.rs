//! Command-line interface logic
//!
//! Serve mode runs the HTTP server; generate mode acquires a single token and
//! prints it to stdout.

pub mod generate;
pub mod serve;
