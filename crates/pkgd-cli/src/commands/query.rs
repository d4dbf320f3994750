//! Read-only queries.
//!
//! Everything except `version` needs the package session, so each command
//! locks, asks, and unlocks again on the same connection.

use std::path::Path;

use anyhow::Result;
use pkgd_cli::PkgdClient;
use pkgd_core::query::{Lookup, PackageAttribute};

use super::{acquire, block_on, connect, map_client_error, release};

/// Print the daemon interface version.
pub fn version(socket_path: &Path) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        let version = client.version().await.map_err(map_client_error)?;
        println!("pkgd daemon interface version {version}");
        Ok(())
    })
}

/// List repository ids. `filter` is `enabled` or a glob over ids.
pub fn repolist(socket_path: &Path, filter: &str) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        acquire(&mut client).await?;
        let result = client.repositories(filter).await;
        release(&mut client).await;

        for id in result.map_err(map_client_error)? {
            println!("{id}");
        }
        Ok(())
    })
}

/// Print one configuration value, or all of them for `*`.
pub fn config(socket_path: &Path, key: &str) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        acquire(&mut client).await?;
        let result = client.config(key).await;
        release(&mut client).await;

        print_lookup(key, result.map_err(map_client_error)?)
    })
}

/// Print one repository.
pub fn repo(socket_path: &Path, id: &str) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        acquire(&mut client).await?;
        let result = client.repo(id).await;
        release(&mut client).await;

        print_lookup(id, result.map_err(map_client_error)?)
    })
}

/// List package ids in one narrow.
pub fn list(socket_path: &Path, narrow: &str) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        acquire(&mut client).await?;
        let result = client.packages(narrow).await;
        release(&mut client).await;

        print_ids(&result.map_err(map_client_error)?);
        Ok(())
    })
}

/// List package ids whose name matches `pattern`.
pub fn search(socket_path: &Path, pattern: &str, newest_only: bool) -> Result<()> {
    block_on(async {
        let mut client = connect(socket_path).await?;
        acquire(&mut client).await?;
        let result = client.packages_by_name(pattern, newest_only).await;
        release(&mut client).await;

        print_ids(&result.map_err(map_client_error)?);
        Ok(())
    })
}

/// Print attributes of one package. No attributes means all of them.
pub fn info(socket_path: &Path, id: &str, attrs: &[String]) -> Result<()> {
    let attrs: Vec<String> = if attrs.is_empty() {
        PackageAttribute::ALL
            .iter()
            .map(|attr| attr.as_str().to_string())
            .collect()
    } else {
        attrs.to_vec()
    };

    block_on(async {
        let mut client = connect(socket_path).await?;
        acquire(&mut client).await?;
        let result = attributes(&mut client, id, &attrs).await;
        release(&mut client).await;

        for (attr, lookup) in result? {
            match lookup {
                Lookup::Found(value) => println!("{attr:<12}: {}", display_value(&value)),
                Lookup::NotFound => anyhow::bail!("No package {id}"),
                Lookup::Unsupported => println!("{attr:<12}: (unsupported)"),
            }
        }
        Ok(())
    })
}

async fn attributes(
    client: &mut PkgdClient,
    id: &str,
    attrs: &[String],
) -> Result<Vec<(String, Lookup<serde_json::Value>)>> {
    let mut values = Vec::with_capacity(attrs.len());
    for attr in attrs {
        let lookup = client.attribute(id, attr).await.map_err(map_client_error)?;
        values.push((attr.clone(), lookup));
    }
    Ok(values)
}

fn print_lookup(subject: &str, lookup: Lookup<serde_json::Value>) -> Result<()> {
    match lookup {
        Lookup::Found(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        },
        Lookup::NotFound => anyhow::bail!("{subject}: not found"),
        Lookup::Unsupported => anyhow::bail!("{subject}: not supported"),
    }
}

fn print_ids(ids: &[String]) {
    if ids.is_empty() {
        println!("No matching packages");
        return;
    }
    for id in ids {
        println!("{id}");
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
