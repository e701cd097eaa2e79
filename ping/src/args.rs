use anyhow::{anyhow, Result};
use clap::Parser;

use crate::{icmp, probe::RECV_BUF_LEN};

/// Largest payload that still fits the receive buffer together with the
/// outer IPv4 header and the ICMP header.
const MAX_PAYLOAD_LEN: usize = RECV_BUF_LEN - 20 - icmp::HEADER_LEN;

#[derive(Parser, Debug)]
#[command(author, version, about = "A simple ICMP echo (ping) utility")]
pub struct Opts {
    /// Destination host, a name or an IPv4 address
    pub destination: String,
    /// Number of probes to send (default: until interrupted)
    #[arg(long, short)]
    pub count: Option<u64>,
    /// Interval between probes in milliseconds
    #[arg(long, short, default_value = "1000")]
    pub interval: u64,
    /// Payload length in bytes
    #[arg(long, short = 's', default_value = "40")]
    pub size: usize,
    /// Time to live of outgoing probes
    #[arg(long, short, default_value = "64")]
    pub ttl: u32,
    /// Per-probe reply timeout in milliseconds
    #[arg(long, short = 'W', default_value = "1000")]
    pub timeout: u64,
    /// Stop after this many seconds, no matter how many probes ran
    #[arg(long, short = 'w')]
    pub deadline: Option<u64>,
    /// Interface to bind the socket to
    #[arg(long, short = 'I')]
    pub iface: Option<String>,
    /// Only print the final summary
    #[arg(long, short)]
    pub quiet: bool,
    /// Also print rtt min/avg/max/mdev in the summary
    #[arg(long, short)]
    pub verbose: bool,
    /// Log each matched reply as a CSV row to this file
    #[arg(long, short)]
    pub file: Option<String>,
}

impl Opts {
    /// Checked once at startup; the engine never re-validates.
    pub fn validate(&self) -> Result<()> {
        if self.size > MAX_PAYLOAD_LEN {
            return Err(anyhow!(
                "payload of {} bytes exceeds the maximum of {}",
                self.size,
                MAX_PAYLOAD_LEN
            ));
        }
        if self.ttl == 0 || self.ttl > 255 {
            return Err(anyhow!("ttl must be between 1 and 255"));
        }
        if self.timeout == 0 {
            return Err(anyhow!("timeout must be at least 1 ms"));
        }
        Ok(())
    }
}
