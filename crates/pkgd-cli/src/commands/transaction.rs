//! Package transactions.
//!
//! One connection carries the whole workflow: subscribe, lock, stage and
//! resolve, print the report, then either commit or unlock. A commit ends
//! the session on the daemon side, so nothing is unlocked after it.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Result, bail};
use pkgd_cli::PkgdClient;
use pkgd_core::package::format_bytes;
use pkgd_core::progress::{Notification, TransactionPhase};
use pkgd_core::{OperationKind, ReportCategory, ResolutionReport, ResolveCode};

use super::{acquire, block_on, connect, map_client_error, release};

/// How far to take a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Resolve and print, never commit.
    pub dry_run: bool,
    /// Commit without asking.
    pub assume_yes: bool,
}

/// Stage `patterns` for `kind`, show the result and commit it.
pub fn run(
    socket_path: &Path,
    kind: OperationKind,
    patterns: &[String],
    opts: RunOptions,
) -> Result<()> {
    let patterns = patterns.join(" ");

    block_on(async {
        let mut client = connect(socket_path).await?;
        client.subscribe().await.map_err(map_client_error)?;
        acquire(&mut client).await?;

        let report = match client.stage(kind, &patterns).await {
            Ok(report) => report,
            Err(e) => {
                release(&mut client).await;
                return Err(map_client_error(e));
            },
        };
        // Staging emits build events only. Dropping them keeps the commit
        // callback from printing them ahead of its own progress.
        drop(client.take_signals());

        for target in &report.unknown_targets {
            eprintln!("No package {target} available.");
        }

        match report.code {
            ResolveCode::Needed => {
                print_messages(&report);
                if report.messages.is_empty() {
                    println!("Nothing to do.");
                }
                release(&mut client).await;
                return Ok(());
            },
            ResolveCode::Error => {
                print_messages(&report);
                release(&mut client).await;
                bail!("Dependency resolution failed");
            },
            ResolveCode::Ok => {},
        }

        print!("{}", render_report(&report));
        print_messages(&report);

        if opts.dry_run || !(opts.assume_yes || confirm()?) {
            release(&mut client).await;
            if !opts.dry_run {
                println!("Operation aborted.");
            }
            return Ok(());
        }

        commit(&mut client).await
    })
}

async fn commit(client: &mut PkgdClient) -> Result<()> {
    println!("Running transaction");
    client
        .run_transaction(|notification| {
            if let Some(line) = progress_line(&notification) {
                println!("{line}");
            }
        })
        .await
        .map_err(map_client_error)?;
    println!("Complete!");
    Ok(())
}

fn confirm() -> Result<bool> {
    print!("Is this ok [y/N]: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_messages(report: &ResolutionReport) {
    for message in &report.messages {
        eprintln!("{message}");
    }
}

const fn heading(category: ReportCategory) -> &'static str {
    match category {
        ReportCategory::Install => "Installing",
        ReportCategory::Update => "Updating",
        ReportCategory::Remove => "Removing",
        ReportCategory::InstallDeps => "Installing for dependencies",
        ReportCategory::UpdateDeps => "Updating for dependencies",
        ReportCategory::RemoveDeps => "Removing for dependencies",
        ReportCategory::Skipped => "Skipped (dependency problems)",
    }
}

/// Renders a resolved report as a grouped table with a size total.
fn render_report(report: &ResolutionReport) -> String {
    let mut out = String::from("\nTransaction summary\n");
    let mut total = 0u64;
    let mut count = 0usize;

    for group in &report.groups {
        out.push_str(heading(group.category));
        out.push_str(":\n");
        for entry in &group.members {
            out.push_str(&format!(
                "  {:<40} {:<16} {:>8}\n",
                entry.id.nevra(),
                entry.id.origin,
                entry.size_display
            ));
            for obsolete in &entry.obsoletes {
                out.push_str(&format!("      replacing {}\n", obsolete.nevra()));
            }
            if group.category != ReportCategory::Skipped {
                total += entry.size;
                count += 1;
            }
        }
    }

    out.push_str(&format!(
        "\n{count} package(s), total size: {}\n",
        format_bytes(total)
    ));
    out
}

/// One line of commit progress, or `None` for intermediate updates.
fn progress_line(notification: &Notification) -> Option<String> {
    match notification {
        Notification::TransactionEvent { event } => match event {
            TransactionPhase::Download => Some("Downloading packages".to_string()),
            TransactionPhase::SignatureCheck => Some("Checking signatures".to_string()),
            TransactionPhase::TestTransaction => Some("Running transaction test".to_string()),
            TransactionPhase::Fail => Some("Transaction failed".to_string()),
            _ => None,
        },
        Notification::DownloadProgress(progress) if progress.frac >= 1.0 => {
            Some(format!("  {} ({})", progress.name, progress.fread))
        },
        Notification::RpmProgress(progress) if progress.te_current >= progress.te_total => {
            Some(format!(
                "  {:<10} {} ({}/{})",
                progress.action.as_str(),
                progress.package,
                progress.ts_current,
                progress.ts_total
            ))
        },
        Notification::DownloadProgress(_) | Notification::RpmProgress(_) => None,
    }
}
