use std::fmt;

pub const ECHO_REQUEST_TYPE: u8 = 8;
pub const ECHO_REPLY_TYPE: u8 = 0;

/// ICMP header size in bytes (type, code, checksum, identifier, sequence).
pub const HEADER_LEN: usize = 8;

/// Minimum length of the outer IPv4 header declared by the IHL field.
const MIN_IPV4_HEADER_LEN: usize = 20;

/// Offset of the TTL byte inside the IPv4 header.
const IPV4_TTL_OFFSET: usize = 8;

/// 16-bit one's-complement checksum over `data`, treated as big-endian
/// words. An odd trailing byte is padded with a zero low byte. The carry is
/// folded back twice: the first fold can itself overflow into bit 16.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    sum = (sum >> 16) + (sum & 0xffff);
    sum += sum >> 16;

    !(sum as u16)
}

/// Builds an Echo Request datagram: 8-byte header followed by `payload`.
/// The checksum is computed over the whole packet with the checksum field
/// zeroed, then written into bytes 2..4.
pub fn encode_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&[ECHO_REQUEST_TYPE, 0, 0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);

    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());

    packet
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than 8 ICMP bytes remain after stripping the outer header.
    TooShort,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort => write!(f, "datagram too short for an ICMP echo header"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Parsed view over a received ICMP datagram. Borrowed from the receive
/// buffer; validation of checksum and identifier is the caller's job.
#[derive(Debug)]
pub struct EchoReply<'a> {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    /// TTL from the stripped IPv4 header, when one was present.
    pub ttl: Option<u8>,
    pub payload: &'a [u8],
}

/// Decodes a received datagram. With `with_ip_header` set (raw-socket
/// delivery on IPv4), the outer header's declared length (low nibble of
/// byte 0 times 4) is stripped first and the TTL extracted from it.
pub fn decode_echo_reply(raw: &[u8], with_ip_header: bool) -> Result<EchoReply<'_>, DecodeError> {
    let (icmp, ttl) = if with_ip_header {
        if raw.is_empty() {
            return Err(DecodeError::TooShort);
        }
        let header_len = ((raw[0] & 0x0f) as usize) * 4;
        if header_len < MIN_IPV4_HEADER_LEN || raw.len() < header_len + HEADER_LEN {
            return Err(DecodeError::TooShort);
        }
        (&raw[header_len..], Some(raw[IPV4_TTL_OFFSET]))
    } else {
        if raw.len() < HEADER_LEN {
            return Err(DecodeError::TooShort);
        }
        (raw, None)
    };

    Ok(EchoReply {
        icmp_type: icmp[0],
        code: icmp[1],
        checksum: u16::from_be_bytes([icmp[2], icmp[3]]),
        identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
        sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        ttl,
        payload: &icmp[HEADER_LEN..],
    })
}

impl EchoReply<'_> {
    /// Recomputes the checksum over the reply with the checksum field
    /// zeroed and compares it against the transmitted field.
    pub fn checksum_ok(&self) -> bool {
        let mut packet = Vec::with_capacity(HEADER_LEN + self.payload.len());
        packet.extend_from_slice(&[self.icmp_type, self.code, 0, 0]);
        packet.extend_from_slice(&self.identifier.to_be_bytes());
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(self.payload);

        checksum(&packet) == self.checksum
    }
}
