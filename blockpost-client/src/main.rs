// Blockpost client: log in to a block storage peer and upload one file in blocks.

mod auth;
mod config;
mod error;
mod transport;
mod upload;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use blockpost_core::UploadEvent;
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::ClientError;
use crate::transport::Session;

/// Exit status when the configuration cannot be resolved.
const EXIT_CONFIG: i32 = 1;
/// Exit status when interrupted by a signal.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "blockpost", version, about = "Upload a file to a block storage peer")]
struct Cli {
    /// Peer address (overrides config and BLOCKPOST_HOST)
    #[arg(long = "server_ip")]
    server_ip: Option<String>,

    /// Peer port
    #[arg(long)]
    port: Option<u16>,

    /// Identity used for login
    #[arg(long)]
    id: Option<String>,

    /// File to upload; without it the client only logs in
    #[arg(long = "f", value_name = "PATH")]
    file: Option<PathBuf>,

    /// Config file instead of the default search path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start runtime");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let code = rt.block_on(async {
        tokio::select! {
            res = run(&cfg, cli.file.as_deref()) => match res {
                Ok(()) => 0,
                Err(e) => {
                    error!("{}", e);
                    e.exit_code()
                }
            },
            res = shutdown_signal() => {
                if let Err(e) = res {
                    warn!(error = %e, "signal handler failed");
                }
                warn!("interrupted");
                EXIT_INTERRUPTED
            }
        }
    });
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Config file and environment first, then command-line flags on top.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = &cli.server_ip {
        cfg.host = host.clone();
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(id) = &cli.id {
        cfg.identity = id.clone();
    }
    if cfg.identity.is_empty() {
        bail!("no identity configured: pass --id, set BLOCKPOST_ID, or add `identity` to the config file");
    }
    Ok(cfg)
}

async fn run(cfg: &Config, file: Option<&Path>) -> Result<(), ClientError> {
    if let Some(path) = file {
        // Fail on a bad path before touching the network.
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| ClientError::FileNotFound {
                path: path.to_path_buf(),
                source,
            })?;
        if !meta.is_file() {
            return Err(ClientError::FileNotFound {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
    }

    let mut session = Session::connect(&cfg.host, cfg.port, cfg.io_timeout()).await?;
    info!(host = %cfg.host, port = cfg.port, "connected");
    let result = session_work(&mut session, cfg, file).await;
    session.close().await;
    result
}

async fn session_work(
    session: &mut Session,
    cfg: &Config,
    file: Option<&Path>,
) -> Result<(), ClientError> {
    auth::authenticate(session, &cfg.identity, cfg.credential_digest).await?;
    let Some(path) = file else {
        info!("no file given, login only");
        return Ok(());
    };

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let renderer = tokio::spawn(render_events(rx));
    let result =
        upload::upload_file(session, path, cfg.integrity_digest, Some(&tx)).await;
    drop(tx);
    let _ = renderer.await;
    result.map(|_| ())
}

async fn render_events(mut rx: UnboundedReceiver<UploadEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UploadEvent::PlanAccepted(plan) => info!(
                "storing as {} in {} block(s) of {} bytes",
                plan.key, plan.total_blocks, plan.block_size
            ),
            UploadEvent::BlockAcknowledged {
                index,
                total_blocks,
                bytes,
            } => info!("block {}/{} sent ({} bytes)", index + 1, total_blocks, bytes),
            UploadEvent::Completed(stats) => info!(
                "upload complete: {} bytes in {:.3}s ({:.2} MiB/s)",
                stats.bytes,
                stats.elapsed.as_secs_f64(),
                stats.mib_per_sec()
            ),
            UploadEvent::Failed { reason } => warn!("upload aborted: {}", reason),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
