//! pkgd - package session client
//!
//! Talks to `pkgd-daemon` over its Unix socket: queries, package
//! transactions with live progress, and daemon control.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pkgd_core::OperationKind;
use pkgd_core::config::PkgdConfig;
use pkgd_core::ipc::DEFAULT_SOCKET_PATH;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::transaction::RunOptions;

/// pkgd - package session client
#[derive(Parser, Debug)]
#[command(name = "pkgd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to daemon configuration file (used to find the socket)
    #[arg(short, long, default_value = "/etc/pkgd/pkgd.toml")]
    config: PathBuf,

    /// Path to Unix socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every transaction command.
#[derive(clap::Args, Debug, Clone, Copy)]
struct TransactionFlags {
    /// Resolve and print the transaction without running it
    #[arg(long)]
    dry_run: bool,

    /// Answer yes to the confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,
}

impl From<TransactionFlags> for RunOptions {
    fn from(flags: TransactionFlags) -> Self {
        Self {
            dry_run: flags.dry_run,
            assume_yes: flags.yes,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Daemon ===
    /// Print the daemon interface version
    Version,

    /// Ask the daemon to exit
    Exit,

    // === Queries ===
    /// List repository ids
    Repolist {
        /// Glob over repository ids; default lists enabled repositories
        #[arg(default_value = "enabled")]
        filter: String,
    },

    /// Show a configuration value ('*' for all)
    Config {
        /// Configuration key
        key: String,
    },

    /// Show one repository
    Repo {
        /// Repository id
        id: String,
    },

    /// List packages (installed, available, updates, obsoletes, recent,
    /// extras)
    #[command(alias = "ls")]
    List {
        /// Package list to show
        #[arg(default_value = "installed")]
        narrow: String,
    },

    /// Find packages by name glob
    Search {
        /// Name pattern
        pattern: String,

        /// Only the newest version of each package
        #[arg(long)]
        newest: bool,
    },

    /// Show package attributes
    Info {
        /// Package id (name,epoch,version,release,arch,repo)
        id: String,

        /// Attributes to show; all when omitted
        attrs: Vec<String>,
    },

    // === Transactions ===
    /// Install packages
    Install {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        flags: TransactionFlags,
    },

    /// Remove packages
    #[command(alias = "erase")]
    Remove {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        flags: TransactionFlags,
    },

    /// Update packages (all when none are named)
    Update {
        /// Package names
        packages: Vec<String>,

        #[command(flatten)]
        flags: TransactionFlags,
    },

    /// Reinstall packages
    Reinstall {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        flags: TransactionFlags,
    },

    /// Downgrade packages
    Downgrade {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        flags: TransactionFlags,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Determine socket path
    let socket_path = cli.socket.clone().unwrap_or_else(|| {
        if cli.config.exists() {
            if let Ok(config) = PkgdConfig::from_file(&cli.config) {
                return config.daemon.socket;
            }
        }
        PathBuf::from(DEFAULT_SOCKET_PATH)
    });

    match cli.command {
        Commands::Version => commands::query::version(&socket_path),
        Commands::Exit => commands::daemon::exit(&socket_path),
        Commands::Repolist { filter } => commands::query::repolist(&socket_path, &filter),
        Commands::Config { key } => commands::query::config(&socket_path, &key),
        Commands::Repo { id } => commands::query::repo(&socket_path, &id),
        Commands::List { narrow } => commands::query::list(&socket_path, &narrow),
        Commands::Search { pattern, newest } => {
            commands::query::search(&socket_path, &pattern, newest)
        },
        Commands::Info { id, attrs } => commands::query::info(&socket_path, &id, &attrs),
        Commands::Install { packages, flags } => {
            commands::transaction::run(&socket_path, OperationKind::Install, &packages, flags.into())
        },
        Commands::Remove { packages, flags } => {
            commands::transaction::run(&socket_path, OperationKind::Remove, &packages, flags.into())
        },
        Commands::Update { packages, flags } => {
            commands::transaction::run(&socket_path, OperationKind::Update, &packages, flags.into())
        },
        Commands::Reinstall { packages, flags } => commands::transaction::run(
            &socket_path,
            OperationKind::Reinstall,
            &packages,
            flags.into(),
        ),
        Commands::Downgrade { packages, flags } => commands::transaction::run(
            &socket_path,
            OperationKind::Downgrade,
            &packages,
            flags.into(),
        ),
    }
}
