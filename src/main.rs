//! `scscp-server` binary: parses configuration, wires up logging, and
//! launches an empty [`Service`] (no procedures registered).
//!
//! Concrete procedure implementations are an external collaborator (spec
//! §1); operators embed this crate as a library and call [`Service::register`]
//! before [`Service::launch`] to expose their own. This binary exists so the
//! crate is runnable out of the box (spec §4.7's default bind address) and
//! as a template for that embedding.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scscp::Service;
use scscp::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", cli.bind))?;

    let service = Service::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    service
        .launch(addr, Duration::from_secs(cli.shutdown_grace_secs))
        .await
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.default_log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
