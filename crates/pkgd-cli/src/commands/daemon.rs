//! Daemon control.

use std::path::Path;

use anyhow::Result;

use super::{block_on, connect, map_client_error};

/// Ask the daemon to exit.
pub fn exit(socket_path: &Path) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        if client.exit().await.map_err(map_client_error)? {
            println!("Daemon shutdown initiated");
        } else {
            println!("Daemon is committing a transaction and stays up");
        }
        Ok(())
    })
}
