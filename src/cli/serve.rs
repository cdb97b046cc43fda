//! Serve mode CLI logic
//!
//! Contains the core logic for running the HTTP server mode.

use crate::{Settings, provider::TokenProvider, server::app};
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Arguments for serve mode
#[derive(Debug)]
pub struct ServeArgs {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub config: Option<String>,
    pub verbose: bool,
}

/// Run serve mode with the given arguments.
///
/// Configuration precedence: CLI arguments, then environment variables, then
/// the configuration file, then defaults.
pub async fn run_serve_mode(args: ServeArgs) -> Result<()> {
    let mut settings = load_settings(args.config.as_deref())?;

    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings.logging.verbose = args.verbose;
    settings.validate()?;

    // Log level precedence: --verbose, then RUST_LOG, then config
    let env_filter = if args.verbose {
        EnvFilter::new("debug")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(&settings.logging.level)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PO token broker v{}", env!("CARGO_PKG_VERSION"));

    let provider = Arc::new(TokenProvider::new(&settings.provider, None)?);
    let app = app::create_app(settings.clone(), provider);

    let addr = parse_and_bind_address(&settings.server.host, settings.server.port).await?;
    tracing::info!("PO token broker listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

/// Load settings from the CLI path, the `PO_BROKER_CONFIG` environment
/// variable, or defaults, then apply environment overrides
pub(crate) fn load_settings(config_path: Option<&str>) -> Result<Settings> {
    let path = config_path
        .map(str::to_string)
        .or_else(|| std::env::var("PO_BROKER_CONFIG").ok());

    let settings = match path {
        Some(path) => Settings::from_file(&path).unwrap_or_else(|e| {
            // Logging is not initialized yet
            eprintln!("Warning: Failed to load configuration: {}. Using defaults.", e);
            Settings::default()
        }),
        None => Settings::default(),
    };

    Ok(settings.merge_with_env()?)
}

/// Parse host string and attempt to bind to the address.
///
/// `::` tries IPv6 first and falls back to `0.0.0.0` when the host has no
/// IPv6 support.
pub async fn parse_and_bind_address(host: &str, port: u16) -> Result<std::net::SocketAddr> {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    match host {
        "::" => {
            let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
            match tokio::net::TcpListener::bind(addr).await {
                Ok(_) => Ok(addr),
                Err(e) => {
                    tracing::warn!(
                        "Could not listen on [::]:{} (Caused by {}), falling back to 0.0.0.0",
                        port,
                        e
                    );
                    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
                }
            }
        }
        "0.0.0.0" => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
        _ => {
            anyhow::bail!(
                "Invalid host address: {}. Use '::' for IPv6 or '0.0.0.0' for IPv4",
                host
            );
        }
    }
}
