//! proxy-reloader
//!
//! Renders the reverse proxy configuration from `reloader.toml`, installs it
//! atomically and reloads nginx, rolling back when the reload fails.
//!
//! ```text
//!   reloader.toml ──▶ validate ──▶ render ──▶ stage ──▶ nginx -t ──▶ rename ──▶ SIGHUP ──▶ health
//!                                                                     │                       │
//!                                                                     ▼                       ▼
//!                                                                  history ◀──── rollback on failure
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use proxy_reloader::config::load_config;
use proxy_reloader::observability::logging::init_logging;
use proxy_reloader::watch::run_watch;
use proxy_reloader::{CancelToken, ConfigPipeline};

#[derive(Parser)]
#[command(name = "proxy-reloader")]
#[command(about = "Render, install and reload the reverse proxy configuration", long_about = None)]
struct Cli {
    /// Reloader configuration file.
    #[arg(short, long, default_value = "/etc/proxy-reloader/reloader.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the proxy parameters without rendering
    Validate,
    /// Render the configuration to stdout or a file
    Render {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render, install and reload
    Apply,
    /// Restore the previous configuration and reload
    Rollback,
    /// Show the live, previous and staged files
    Status,
    /// Re-apply on config change or SIGHUP until terminated
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.observability.log_level);

    tracing::debug!(config = %cli.config.display(), live = %config.paths.live.display(), "Configuration loaded");

    let pipeline = || ConfigPipeline::with_nginx(&config);
    match cli.command {
        Commands::Validate => {
            let validated = pipeline()?.validate(&config.parameters)?;
            println!(
                "parameters valid (user {} uid {}, ports {}/{} -> {})",
                validated.user().name,
                validated.user().uid,
                validated.ssl_port(),
                validated.plain_port(),
                validated.upstream_port()
            );
        }
        Commands::Render { output } => {
            let rendered = pipeline()?.render(&config.parameters)?;
            match output {
                Some(path) => std::fs::write(&path, rendered.as_bytes())?,
                None => print!("{}", String::from_utf8_lossy(rendered.as_bytes())),
            }
        }
        Commands::Apply => {
            let cancel = cancel_on_ctrl_c();
            let report = pipeline()?.apply(&config.parameters, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Rollback => {
            let cancel = cancel_on_ctrl_c();
            let outcome = pipeline()?.rollback(&cancel).await?;
            println!("{}", outcome);
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&pipeline()?.status())?);
        }
        Commands::Watch => run_watch(&cli.config, config.clone()).await?,
    }

    Ok(())
}

/// Ctrl-C cancels a request still queued on the install lock.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling if not yet staged");
            trigger.cancel();
        }
    });
    cancel
}
