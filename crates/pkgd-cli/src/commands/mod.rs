//! CLI command implementations.

pub mod daemon;
pub mod query;
pub mod transaction;

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result, bail};
use pkgd_cli::{ClientError, PkgdClient};
use pkgd_core::ipc::FaultCode;
use tracing::warn;

/// Runs `future` on a current-thread runtime.
fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    rt.block_on(future)
}

async fn connect(socket_path: &Path) -> Result<PkgdClient> {
    PkgdClient::connect(socket_path)
        .await
        .map_err(map_client_error)
}

/// Takes the session lock for this connection.
async fn acquire(client: &mut PkgdClient) -> Result<()> {
    match client.lock().await {
        Ok(_) => Ok(()),
        Err(ClientError::Fault(fault)) if fault.code == FaultCode::Locked => {
            bail!("Another client holds the package session: {}", fault.message)
        },
        Err(e) => Err(map_client_error(e)),
    }
}

/// Gives the session lock back. Failures only warn: the watchdog reclaims a
/// session nobody releases.
async fn release(client: &mut PkgdClient) {
    if let Err(e) = client.unlock().await {
        warn!(error = %e, "Failed to release package session");
    }
}

/// Maps client errors to anyhow errors with user-friendly messages.
fn map_client_error(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::DaemonNotRunning => {
            anyhow::anyhow!("Daemon is not running (socket does not exist)")
        },
        ClientError::Io(e) => anyhow::anyhow!("I/O error communicating with daemon: {e}"),
        ClientError::Frame(e) => anyhow::anyhow!("Failed to decode daemon response: {e}"),
        ClientError::Fault(fault) => {
            let mut message = format!("Daemon error ({}): {}", fault.code, fault.message);
            for detail in &fault.details {
                message.push_str("\n  ");
                message.push_str(detail);
            }
            anyhow::anyhow!(message)
        },
        ClientError::Timeout => anyhow::anyhow!("Daemon did not answer in time"),
        ClientError::ConnectionClosed => anyhow::anyhow!("Daemon closed the connection"),
        e @ ClientError::UnexpectedReply { .. } => {
            anyhow::anyhow!("Unexpected daemon response: {e}")
        },
    }
}
