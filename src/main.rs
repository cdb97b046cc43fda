//! Unified CLI for the PO token broker
//!
//! This is the main binary providing both serve and generate modes through a
//! unified command-line interface using subcommands.
//!
//! # Usage
//!
//! ## Serve Mode
//! ```bash
//! po-broker serve --port 4419 --host 0.0.0.0
//! ```
//!
//! ## Generate Mode
//! ```bash
//! po-broker --video-id "dQw4w9WgXcQ" --verbose
//! ```

use clap::{Parser, Subcommand};

use po_token_broker::cli::{
    generate::{GenerateArgs, run_generate_mode},
    serve::{ServeArgs, run_serve_mode},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "po-broker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    // Generate mode options (when no subcommand is provided)
    /// Video identifier to bind the token to
    #[arg(short = 'i', long, value_name = "VIDEO_ID", allow_hyphen_values = true)]
    video_id: Option<String>,

    /// Visitor data identifying the session
    #[arg(short = 'v', long, value_name = "VISITOR_DATA")]
    visitor_data: Option<String>,

    /// Remote token server URL
    #[arg(short = 's', long, value_name = "SERVER_URL")]
    server_url: Option<String>,

    /// Configuration file path
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server mode
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Configuration file path
        #[arg(long)]
        config: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            port,
            host,
            config,
            verbose,
        }) => {
            let args = ServeArgs {
                port,
                host,
                config,
                verbose,
            };
            run_serve_mode(args).await
        }
        None => {
            let args = GenerateArgs {
                video_id: cli.video_id,
                visitor_data: cli.visitor_data,
                server_url: cli.server_url,
                config: cli.config,
                verbose: cli.verbose,
            };
            run_generate_mode(args).await
        }
    }
}
