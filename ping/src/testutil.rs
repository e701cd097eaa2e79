use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
};

use anyhow::{anyhow, Result};

use crate::{icmp, probe::ProbeSocket};

/// How the scripted peer behaves for every request it sees.
pub(crate) enum Script {
    /// Echoes every request back as a well-formed reply.
    EchoReply { ttl: u8 },
    /// Replies with somebody else's identifier.
    ForeignIdentifier { ttl: u8 },
    /// Delivers the outgoing request first (loopback), then the reply.
    RequestThenReply { ttl: u8 },
    /// Replies with a payload byte flipped after the checksum was set.
    CorruptChecksum { ttl: u8 },
    /// Never delivers anything.
    Silent,
    /// Every send fails at the socket layer.
    FailSend,
}

/// In-memory stand-in for the raw ICMP socket: sends queue scripted
/// datagrams, receives pop them, an empty queue blocks forever so the
/// prober's deadline is what ends the wait.
pub(crate) struct FakeSocket {
    script: Script,
    queued: VecDeque<Vec<u8>>,
    from: SocketAddr,
}

impl FakeSocket {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            queued: VecDeque::new(),
            from: "127.0.0.1:0".parse().unwrap(),
        }
    }
}

fn make_reply(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = icmp::encode_echo_request(identifier, sequence, payload);
    packet[0] = icmp::ECHO_REPLY_TYPE;
    packet[2] = 0;
    packet[3] = 0;
    let sum = icmp::checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

fn wrap_ipv4(icmp_packet: &[u8], ttl: u8) -> Vec<u8> {
    let mut raw = vec![0u8; 20];
    raw[0] = 0x45;
    raw[8] = ttl;
    raw.extend_from_slice(icmp_packet);
    raw
}

impl ProbeSocket for FakeSocket {
    async fn send_to(&mut self, packet: &[u8], _addr: &IpAddr) -> Result<usize> {
        let request = icmp::decode_echo_reply(packet, false).expect("outgoing request must parse");

        match self.script {
            Script::EchoReply { ttl } => {
                let reply = make_reply(request.identifier, request.sequence, request.payload);
                self.queued.push_back(wrap_ipv4(&reply, ttl));
            }
            Script::ForeignIdentifier { ttl } => {
                let reply = make_reply(
                    request.identifier.wrapping_add(1),
                    request.sequence,
                    request.payload,
                );
                self.queued.push_back(wrap_ipv4(&reply, ttl));
            }
            Script::RequestThenReply { ttl } => {
                self.queued.push_back(wrap_ipv4(packet, ttl));
                let reply = make_reply(request.identifier, request.sequence, request.payload);
                self.queued.push_back(wrap_ipv4(&reply, ttl));
            }
            Script::CorruptChecksum { ttl } => {
                let mut reply = make_reply(request.identifier, request.sequence, request.payload);
                let last = reply.len() - 1;
                reply[last] ^= 0xff;
                self.queued.push_back(wrap_ipv4(&reply, ttl));
            }
            Script::Silent => {}
            Script::FailSend => return Err(anyhow!("sendto: network is unreachable")),
        }

        Ok(packet.len())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match self.queued.pop_front() {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok((datagram.len(), self.from))
            }
            None => std::future::pending().await,
        }
    }
}
