//! # Eagle-Relay Server
//!
//! Main entry point for the eagle-relay server and its ET-Check requests.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eagle_relay_api::{create_router, AppState};
use eagle_relay_core::{
    send_et_check_auth_req, send_et_check_ping_req, send_et_check_speed_req,
    send_et_check_version_req, Config, RelayContext, Relayer,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eagle-relay")]
#[command(author, version, about = "Multi-protocol relay (EagleTunnel, HTTP, SOCKS5)", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relayer (default)
    Serve,
    /// Query the configured upstream relayer
    Check {
        #[arg(value_enum)]
        kind: CheckKind,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CheckKind {
    Auth,
    Ping,
    Version,
    Speed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let _log_guard = init_logging(&config)?;

    let ctx = Arc::new(RelayContext::new(config).context("Invalid configuration")?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(ctx).await,
        Command::Check { kind } => {
            println!("{}", check(&ctx, kind).await);
            Ok(())
        }
    }
}

async fn serve(ctx: Arc<RelayContext>) -> Result<()> {
    info!(
        "Starting eagle-relay v{}",
        env!("CARGO_PKG_VERSION")
    );

    let relayer = Relayer::new(Arc::clone(&ctx));

    if ctx.config().dashboard.enabled {
        let api_addr: SocketAddr = format!("{}:{}", ctx.config().server.host, ctx.config().dashboard.port)
            .parse()
            .context("Invalid API bind address")?;
        let router = create_router(AppState::from_relayer(&relayer));
        let listener = tokio::net::TcpListener::bind(api_addr)
            .await
            .with_context(|| format!("Failed to bind API server on {}", api_addr))?;

        info!("API server listening on http://{}", api_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("API server error: {}", e);
            }
        });
    }

    let relay_task = {
        let relayer = Arc::clone(&relayer);
        tokio::spawn(async move { relayer.start().await })
    };

    tokio::select! {
        result = relay_task => {
            result
                .context("Relayer task panicked")?
                .with_context(|| format!("Failed to listen on {}", ctx.config().server.bind_addr()))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            relayer.close().await;
        }
    }

    info!("Eagle-relay shut down");
    Ok(())
}

async fn check(ctx: &RelayContext, kind: CheckKind) -> String {
    match kind {
        CheckKind::Auth => send_et_check_auth_req(ctx).await,
        CheckKind::Version => send_et_check_version_req(ctx).await,
        CheckKind::Speed => send_et_check_speed_req(ctx).await,
        CheckKind::Ping => {
            let (tx, rx) = oneshot::channel();
            send_et_check_ping_req(ctx, tx).await;
            match rx.await {
                Ok(millis) if millis.bytes().all(|b| b.is_ascii_digit()) => format!("{} ms", millis),
                Ok(message) => message,
                Err(_) => "ping result lost".to_string(),
            }
        }
    }
}

/// Load configuration from the given file, the default locations, or defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return read_config(path);
    }

    let config_paths = ["eagle-relay.toml", "/etc/eagle-relay/config.toml"];
    for path in config_paths {
        let path = Path::new(path);
        if path.exists() {
            return read_config(path);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Initialize logging; a configured log file gets a non-blocking writer whose
/// guard must live until exit.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false);

    match &config.logging.file {
        Some(file) => {
            let path = Path::new(file);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", file))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder.with_writer(writer).with_ansi(false).init();
            Ok(Some(guard))
        }
        None => {
            builder.init();
            Ok(None)
        }
    }
}
