use std::{
    net::{IpAddr, ToSocketAddrs},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use common::{AsyncICMPSocket, ICMPSocket, Logger};
use tokio_util::sync::CancellationToken;

mod args;
mod icmp;
mod logger;
mod probe;
mod runner;
mod session;
#[cfg(test)]
mod testutil;

use crate::runner::{RunConfig, RunController};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let opts = args::Opts::parse();
    opts.validate()?;

    let addr = resolve_host(&opts.destination)?;

    let socket = ICMPSocket::new(opts.iface.as_deref(), Some(opts.ttl))
        .context("failed to open a raw ICMP socket (requires CAP_NET_RAW)")?;
    let socket = AsyncICMPSocket::new(socket)?;

    let logger = match opts.file.clone() {
        Some(file_name) => Some(Logger::new(file_name)?),
        None => None,
    };

    let cfg = RunConfig {
        hostname: opts.destination.clone(),
        addr,
        count: opts.count,
        interval: Duration::from_millis(opts.interval),
        timeout: Duration::from_millis(opts.timeout),
        deadline: opts.deadline.map(Duration::from_secs),
        payload_len: opts.size,
        quiet: opts.quiet,
        verbose: opts.verbose,
    };

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            // Newline so the summary does not share a line with "^C".
            println!();
            watcher.cancel();
        }
    });

    let mut controller = RunController::new(cfg, socket, logger);
    controller.run(cancel).await?;

    Ok(())
}

/// Resolves the destination to its first IPv4 address. Failure here is
/// fatal before any probe is attempted.
fn resolve_host(destination: &str) -> Result<IpAddr> {
    let addrs = (destination, 0u16)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {destination}"))?;

    addrs
        .map(|addr| addr.ip())
        .find(|ip| ip.is_ipv4())
        .ok_or_else(|| anyhow!("no IPv4 address found for {destination}"))
}
