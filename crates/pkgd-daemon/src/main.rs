//! pkgd-daemon - privileged package session daemon
//!
//! Serves the package session over a Unix socket until it is told to stop.
//! Three things stop it, all through one shutdown signal: SIGTERM/SIGINT, an
//! `Exit` call, and the idle watchdog. The daemon is meant to be started on
//! demand by a service manager, so it never forks.
//!
//! The binary uses a synchronous `fn main()` that parses arguments and then
//! builds the Tokio runtime itself with `block_on()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pkgd_core::config::PkgdConfig;
use pkgd_daemon::auth::PeerCredentialAuthority;
use pkgd_daemon::engine::CatalogFactory;
use pkgd_daemon::server::{ServerConfig, SocketServer};
use pkgd_daemon::service::{PackageService, ServiceTimeouts};
use pkgd_daemon::watchdog::{Watchdog, WatchdogConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// pkgd daemon - privileged package session service
#[derive(Parser, Debug)]
#[command(name = "pkgd-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/pkgd/pkgd.toml")]
    config: PathBuf,

    /// Path to the Unix socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Path to the package catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Path to PID file
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Keep running when idle (disables the watchdog)
    #[arg(long)]
    no_timeout: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Configuration after CLI overrides.
struct DaemonConfig {
    config: PkgdConfig,
    pid_path: Option<PathBuf>,
}

impl DaemonConfig {
    fn new(args: &Args) -> Result<Self> {
        let mut config = if args.config.exists() {
            PkgdConfig::from_file(&args.config).context("failed to load configuration")?
        } else {
            PkgdConfig::default()
        };

        // CLI args override the config file
        if let Some(socket) = &args.socket {
            config.daemon.socket.clone_from(socket);
        }
        if let Some(catalog) = &args.catalog {
            config.engine.catalog.clone_from(catalog);
        }
        if args.no_timeout {
            config.watchdog.disabled = true;
        }
        let pid_path = args.pid_file.clone().or_else(|| config.daemon.pid_file.clone());

        Ok(Self { config, pid_path })
    }
}

/// Write the PID file via a temporary file and rename.
fn write_pid_file(pid_path: &Path) -> Result<()> {
    let mut tmp = pid_path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, std::process::id().to_string())
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, pid_path).context("failed to write PID file")?;
    info!("PID file written to {:?}", pid_path);
    Ok(())
}

/// Remove PID file.
fn remove_pid_file(pid_path: &Path) {
    if pid_path.exists() {
        if let Err(e) = std::fs::remove_file(pid_path) {
            warn!("Failed to remove PID file: {e}");
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(&args)?;

    let daemon_config = DaemonConfig::new(&args)?;
    let config = &daemon_config.config;
    info!(
        config = %args.config.display(),
        catalog = %config.engine.catalog.display(),
        "pkgd-daemon starting"
    );

    let authority = PeerCredentialAuthority::new(
        config.authorization.allowed_uids.iter().copied(),
        config.authorization.allowed_gids.iter().copied(),
    );
    let factory = CatalogFactory::new(config.engine.catalog.clone(), config.engine.lock_path());
    let service = Arc::new(PackageService::new(
        Arc::new(authority),
        Arc::new(factory),
        ServiceTimeouts::from(&config.timeouts),
    ));

    let server = SocketServer::bind(ServerConfig {
        socket_path: config.daemon.socket.clone(),
        socket_mode: config.daemon.socket_mode,
        ..ServerConfig::default()
    })
    .context("failed to bind socket")?;

    if let Some(pid_path) = &daemon_config.pid_path {
        write_pid_file(pid_path)?;
    }

    let watchdog_task = if config.watchdog.disabled {
        info!("Watchdog disabled, daemon stays up until told to exit");
        None
    } else {
        let watchdog = Watchdog::new(
            WatchdogConfig::from(&config.watchdog),
            Arc::clone(service.monitor()),
        );
        Some(tokio::spawn(Arc::clone(&service).run_watchdog(watchdog)))
    };

    // Handle Unix signals
    let signal_shutdown = Arc::clone(service.shutdown_signal());
    let signal_task = tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to register signal handlers");
                    return;
                },
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            () = signal_shutdown.wait() => return,
        }
        signal_shutdown.request();
    });

    server.serve(Arc::clone(&service)).await;

    signal_task.abort();
    if let Some(task) = watchdog_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Watchdog task failed");
        }
    }

    info!("Shutting down daemon");
    service.shutdown_session().await;

    if let Err(e) = server.cleanup() {
        warn!("Failed to cleanup socket: {e}");
    }
    if let Some(pid_path) = &daemon_config.pid_path {
        remove_pid_file(pid_path);
    }

    info!(
        uptime_secs = service.shutdown_signal().uptime_secs(),
        "Daemon shutdown complete"
    );
    Ok(())
}
