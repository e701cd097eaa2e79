use std::{
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use anyhow::Result;
use common::AsyncICMPSocket;
use rand::Rng;

use crate::{icmp, session::EchoSession};

/// Receive buffer size, enough for an MTU-sized datagram.
pub const RECV_BUF_LEN: usize = 1500;

/// What one probe resolved to. Every probe ends in exactly one of these.
#[derive(Debug)]
pub enum ProbeOutcome {
    Success {
        rtt: Duration,
        ttl: Option<u8>,
        source: IpAddr,
    },
    Timeout,
    Error(anyhow::Error),
}

/// Socket operations the prober needs. The real implementation is the raw
/// ICMP socket; tests script one instead.
pub(crate) trait ProbeSocket {
    async fn send_to(&mut self, packet: &[u8], addr: &IpAddr) -> Result<usize>;
    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
}

impl ProbeSocket for AsyncICMPSocket {
    async fn send_to(&mut self, packet: &[u8], addr: &IpAddr) -> Result<usize> {
        AsyncICMPSocket::send_to(self, packet, addr).await
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        AsyncICMPSocket::recv_from(self, buf).await
    }
}

/// Sends one Echo Request and waits, bounded by the per-probe deadline,
/// for the matching reply. Exclusively owns the socket while a probe is in
/// flight; probes are strictly sequential.
pub(crate) struct Prober<S> {
    socket: S,
    dst_addr: IpAddr,
    payload_len: usize,
    timeout: Duration,
    buf: [u8; RECV_BUF_LEN],
}

impl<S: ProbeSocket> Prober<S> {
    pub fn new(socket: S, dst_addr: IpAddr, payload_len: usize, timeout: Duration) -> Self {
        Self {
            socket,
            dst_addr,
            payload_len,
            timeout,
            buf: [0u8; RECV_BUF_LEN],
        }
    }

    pub async fn probe(&mut self, session: &mut EchoSession) -> ProbeOutcome {
        let sequence = session.next_sequence();

        let mut payload = vec![0u8; self.payload_len];
        rand::thread_rng().fill(&mut payload[..]);
        let packet = icmp::encode_echo_request(session.identifier(), sequence, &payload);

        let sent_at = Instant::now();
        let sent = self.socket.send_to(&packet, &self.dst_addr).await;
        // Fire-and-forget: the counters advance as soon as the send is
        // issued, reply or not.
        session.mark_sent();
        if let Err(e) = sent {
            return ProbeOutcome::Error(e);
        }

        self.await_reply(session.identifier(), sequence, sent_at).await
    }

    /// Reads datagrams until the matching reply arrives or the remaining
    /// deadline runs out. Foreign datagrams only consume wall-clock time,
    /// which shrinks the deadline on the next wait.
    async fn await_reply(
        &mut self,
        identifier: u16,
        sequence: u16,
        sent_at: Instant,
    ) -> ProbeOutcome {
        loop {
            let remaining = match self.timeout.checked_sub(sent_at.elapsed()) {
                Some(left) if !left.is_zero() => left,
                _ => return ProbeOutcome::Timeout,
            };

            let (len, from) =
                match tokio::time::timeout(remaining, self.socket.recv_from(&mut self.buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => return ProbeOutcome::Error(e),
                    Err(_deadline) => return ProbeOutcome::Timeout,
                };

            let reply = match icmp::decode_echo_reply(&self.buf[..len], true) {
                Ok(reply) => reply,
                // Truncated or malformed datagram, cannot be ours.
                Err(icmp::DecodeError::TooShort) => continue,
            };

            // Our own request looped back (e.g. pinging 127.0.0.1); read on.
            if reply.icmp_type == icmp::ECHO_REQUEST_TYPE {
                continue;
            }
            if reply.icmp_type != icmp::ECHO_REPLY_TYPE || reply.code != 0 {
                continue;
            }
            // Exact equality on both fields: only one probe is outstanding,
            // so wraparound never aliases an old sequence.
            if reply.identifier != identifier || reply.sequence != sequence {
                continue;
            }
            if !reply.checksum_ok() {
                continue;
            }

            return ProbeOutcome::Success {
                rtt: sent_at.elapsed(),
                ttl: reply.ttl,
                source: from.ip(),
            };
        }
    }
}
