//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use dropdrive_core::oauth::IncludeGrantedScopes;

mod commands;

#[derive(Parser)]
#[command(name = "dropdrive")]
#[command(version)]
#[command(about = "Dropbox drive authorization CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Authorize a drive (loopback OAuth flow, cached token if present)
    Login {
        /// Drive name the tokens are stored under
        #[arg(long, value_name = "NAME")]
        drive: String,

        /// Comma-separated Dropbox scopes to request
        #[arg(
            long,
            value_delimiter = ',',
            default_value = "files.metadata.read,files.content.read"
        )]
        scopes: Vec<String>,

        /// Keep previously granted scopes (none, user, team)
        #[arg(long, value_name = "MODE", default_value = "none")]
        include_granted_scopes: String,
    },

    /// Remove a drive's cached tokens
    Logout {
        /// Drive name to clear
        #[arg(long, value_name = "NAME")]
        drive: String,
    },

    /// Show whether a drive has a cached token
    Status {
        /// Drive name to inspect
        #[arg(long, value_name = "NAME")]
        drive: String,
    },
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("DROPDRIVE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Login {
            drive,
            scopes,
            include_granted_scopes,
        } => {
            let include_granted_scopes: IncludeGrantedScopes = include_granted_scopes
                .parse()
                .context("parse --include-granted-scopes")?;
            commands::auth::login(&drive, &scopes, include_granted_scopes).await
        }
        Commands::Logout { drive } => commands::auth::logout(&drive),
        Commands::Status { drive } => commands::auth::status(&drive),
    }
}
