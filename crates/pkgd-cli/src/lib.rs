//! pkgd-cli - client library for the pkgd package session daemon
//!
//! [`client::PkgdClient`] speaks the daemon's framed socket protocol. The
//! `pkgd` binary in this crate is a thin command layer on top of it.

pub mod client;

pub use client::{ClientError, PkgdClient};
