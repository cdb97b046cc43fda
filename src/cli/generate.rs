//! Generate mode CLI logic
//!
//! Acquires a single token through the provider chain and prints the JSON
//! response to stdout. Diagnostics go to stderr so the output stays parseable.

use crate::{provider::TokenProvider, types::PotRequest};
use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Arguments for generate mode
#[derive(Debug)]
pub struct GenerateArgs {
    pub video_id: Option<String>,
    pub visitor_data: Option<String>,
    pub server_url: Option<String>,
    pub config: Option<String>,
    pub verbose: bool,
}

/// Run generate mode with the given arguments
pub async fn run_generate_mode(args: GenerateArgs) -> Result<()> {
    let env_filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = super::serve::load_settings(args.config.as_deref())?;
    if args.server_url.is_some() {
        settings.provider.server_url = args.server_url;
    }

    let provider = TokenProvider::new(&settings.provider, None)?;

    let mut request = PotRequest::new();
    if let Some(video_id) = args.video_id {
        request = request.with_video_id(video_id);
    }
    if let Some(visitor_data) = args.visitor_data {
        request = request.with_visitor_data(visitor_data);
    }

    match provider.get_po_token(&request).await {
        Some(response) => {
            println!("{}", serde_json::to_string(&response)?);
            Ok(())
        }
        None => anyhow::bail!("no configured token strategy could serve the request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_args_defaults() {
        let args = GenerateArgs {
            video_id: None,
            visitor_data: None,
            server_url: None,
            config: None,
            verbose: false,
        };
        assert!(args.video_id.is_none());
        assert!(!args.verbose);
    }
}
