use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

pub const ICMP_HEADER_SIZE: usize = 8;
pub const IPV4_MIN_HEADER_SIZE: usize = 20;
/// Largest payload that still fits in one IPv4 datagram.
pub const MAX_PAYLOAD_SIZE: usize = 65_535 - IPV4_MIN_HEADER_SIZE - ICMP_HEADER_SIZE;
/// Bytes at the front of the payload holding the send timestamp.
pub const TIMESTAMP_SIZE: usize = 8;

const IPPROTO_ICMP: u8 = 1;
const PAYLOAD_FILL: u8 = 0x61;

/// A packet codec error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("payload of {0} bytes exceeds maximum of {MAX_PAYLOAD_SIZE}")]
    TooLarge(usize),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Correlates an outbound probe with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId {
    pub identifier: u16,
    pub sequence: u16,
}

impl ProbeId {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self { identifier, sequence }
    }
}

/// An inbound ICMP message, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply(ProbeId),
    /// Carries the identity found in the quoted copy of the original probe.
    TimeExceeded(ProbeId),
    DestinationUnreachable { original: ProbeId, code: u8 },
    Unrecognized { icmp_type: u8, code: u8 },
}

/// Build an Echo Request datagram with its checksum filled in.
pub fn encode_echo_request(id: ProbeId, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    encode_echo(ICMP_ECHO_REQUEST, id, payload)
}

fn encode_echo(icmp_type: u8, id: ProbeId, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(PacketError::TooLarge(payload.len()));
    }
    let mut bytes = vec![0u8; ICMP_HEADER_SIZE];
    bytes[0] = icmp_type;
    BigEndian::write_u16(&mut bytes[4..6], id.identifier);
    BigEndian::write_u16(&mut bytes[6..8], id.sequence);
    bytes.extend_from_slice(payload);
    let sum = checksum(&bytes);
    BigEndian::write_u16(&mut bytes[2..4], sum);
    Ok(bytes)
}

/// Payload of `size` bytes: the send time in nanoseconds, then filler.
pub fn echo_payload(size: usize, sent_at: SystemTime) -> Vec<u8> {
    let nanos = sent_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut payload = vec![PAYLOAD_FILL; size];
    let mut stamp = [0u8; TIMESTAMP_SIZE];
    BigEndian::write_u64(&mut stamp, nanos);
    let len = size.min(TIMESTAMP_SIZE);
    payload[..len].copy_from_slice(&stamp[..len]);
    payload
}

/// Parse an ICMP message (without IP header).
///
/// Input comes from arbitrary hosts, so every length is checked before it is used.
pub fn decode(data: &[u8]) -> Result<IcmpMessage, PacketError> {
    if data.len() < ICMP_HEADER_SIZE {
        return Err(PacketError::Malformed("shorter than ICMP header"));
    }
    if checksum(data) != 0 {
        return Err(PacketError::ChecksumMismatch);
    }

    let mut cursor = Cursor::new(data);
    let truncated = |_| PacketError::Malformed("truncated ICMP header");
    let icmp_type = cursor.read_u8().map_err(truncated)?;
    let code = cursor.read_u8().map_err(truncated)?;
    let _checksum = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let identifier = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let sequence = cursor.read_u16::<BigEndian>().map_err(truncated)?;

    let message = match icmp_type {
        ICMP_ECHO_REPLY => IcmpMessage::EchoReply(ProbeId::new(identifier, sequence)),
        ICMP_TIME_EXCEEDED => match quoted_probe(&data[ICMP_HEADER_SIZE..])? {
            Some(original) => IcmpMessage::TimeExceeded(original),
            None => IcmpMessage::Unrecognized { icmp_type, code },
        },
        ICMP_DEST_UNREACHABLE => match quoted_probe(&data[ICMP_HEADER_SIZE..])? {
            Some(original) => IcmpMessage::DestinationUnreachable { original, code },
            None => IcmpMessage::Unrecognized { icmp_type, code },
        },
        _ => IcmpMessage::Unrecognized { icmp_type, code },
    };
    Ok(message)
}

/// Extract the probe identity from the IPv4 + ICMP header quoted in an error message.
///
/// Returns `None` when the quoted datagram was not one of our Echo Requests.
fn quoted_probe(quoted: &[u8]) -> Result<Option<ProbeId>, PacketError> {
    if quoted.len() < IPV4_MIN_HEADER_SIZE {
        return Err(PacketError::Malformed("truncated quoted IPv4 header"));
    }
    if quoted[0] >> 4 != 4 {
        return Err(PacketError::Malformed("quoted datagram is not IPv4"));
    }
    let header_len = usize::from(quoted[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_SIZE {
        return Err(PacketError::Malformed("quoted IPv4 header length too small"));
    }
    if quoted.len() < header_len + ICMP_HEADER_SIZE {
        return Err(PacketError::Malformed("truncated quoted ICMP header"));
    }
    let icmp = &quoted[header_len..];
    if quoted[9] != IPPROTO_ICMP || icmp[0] != ICMP_ECHO_REQUEST {
        return Ok(None);
    }
    Ok(Some(ProbeId::new(
        BigEndian::read_u16(&icmp[4..6]),
        BigEndian::read_u16(&icmp[6..8]),
    )))
}

/// Skip the IPv4 header if the raw socket delivered one.
pub fn strip_ipv4_header(data: &[u8]) -> &[u8] {
    if data.len() >= IPV4_MIN_HEADER_SIZE && data[0] >> 4 == 4 {
        let header_len = usize::from(data[0] & 0x0f) * 4;
        if header_len >= IPV4_MIN_HEADER_SIZE && data.len() >= header_len {
            return &data[header_len..];
        }
    }
    data
}

/// Internet checksum: ones' complement of the ones' complement sum of 16-bit words.
///
/// Over a buffer that already carries a correct checksum this yields 0.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(BigEndian::read_u16(word));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !sum as u16
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_case::test_case;

    /// An ICMP error message quoting an Echo Request for `original`.
    pub(crate) fn quoting_message(icmp_type: u8, code: u8, original: ProbeId) -> Vec<u8> {
        let mut ip = vec![0u8; IPV4_MIN_HEADER_SIZE];
        ip[0] = 0x45;
        ip[8] = 1;
        ip[9] = IPPROTO_ICMP;
        let probe = encode_echo_request(original, &[0x61; 8]).unwrap();

        let mut bytes = vec![icmp_type, code, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&ip);
        bytes.extend_from_slice(&probe[..ICMP_HEADER_SIZE]);
        let sum = checksum(&bytes);
        BigEndian::write_u16(&mut bytes[2..4], sum);
        bytes
    }

    pub(crate) fn echo_reply(id: ProbeId, payload: &[u8]) -> Vec<u8> {
        encode_echo(ICMP_ECHO_REPLY, id, payload).unwrap()
    }

    #[test]
    fn test_echo_request_layout() {
        let bytes = encode_echo_request(ProbeId::new(0x1234, 7), &[0x61; 32]).unwrap();
        assert_eq!(bytes.len(), ICMP_HEADER_SIZE + 32);
        assert_eq!(bytes[0], ICMP_ECHO_REQUEST);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[4..8], &[0x12, 0x34, 0x00, 0x07]);
        assert_eq!(checksum(&bytes), 0);
    }

    #[test]
    fn test_known_checksum() {
        // type 8, id 1, seq 1, no payload: !(0x0800 + 0x0001 + 0x0001)
        let bytes = encode_echo_request(ProbeId::new(1, 1), &[]).unwrap();
        assert_eq!(BigEndian::read_u16(&bytes[2..4]), 0xf7fd);
    }

    #[test]
    fn test_odd_length_checksum() {
        let bytes = encode_echo_request(ProbeId::new(9, 3), &[1, 2, 3]).unwrap();
        assert_eq!(checksum(&bytes), 0);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            encode_echo_request(ProbeId::new(1, 1), &payload),
            Err(PacketError::TooLarge(MAX_PAYLOAD_SIZE + 1))
        );
    }

    #[test]
    fn test_decode_echo_reply() {
        let bytes = echo_reply(ProbeId::new(4242, 17), &[0x61; 24]);
        assert_eq!(
            decode(&bytes),
            Ok(IcmpMessage::EchoReply(ProbeId::new(4242, 17)))
        );
    }

    #[test]
    fn test_decode_own_echo_request_is_unrecognized() {
        let bytes = encode_echo_request(ProbeId::new(1, 2), &[0x61; 8]).unwrap();
        assert_eq!(
            decode(&bytes),
            Ok(IcmpMessage::Unrecognized { icmp_type: ICMP_ECHO_REQUEST, code: 0 })
        );
    }

    #[test]
    fn test_decode_time_exceeded() {
        let bytes = quoting_message(ICMP_TIME_EXCEEDED, 0, ProbeId::new(77, 301));
        assert_eq!(
            decode(&bytes),
            Ok(IcmpMessage::TimeExceeded(ProbeId::new(77, 301)))
        );
    }

    #[test]
    fn test_decode_destination_unreachable() {
        let bytes = quoting_message(ICMP_DEST_UNREACHABLE, 1, ProbeId::new(77, 5));
        assert_eq!(
            decode(&bytes),
            Ok(IcmpMessage::DestinationUnreachable { original: ProbeId::new(77, 5), code: 1 })
        );
    }

    #[test]
    fn test_time_exceeded_quoting_udp_is_unrecognized() {
        let mut bytes = quoting_message(ICMP_TIME_EXCEEDED, 0, ProbeId::new(1, 1));
        bytes[ICMP_HEADER_SIZE + 9] = 17;
        bytes[2] = 0;
        bytes[3] = 0;
        let sum = checksum(&bytes);
        BigEndian::write_u16(&mut bytes[2..4], sum);
        assert_eq!(
            decode(&bytes),
            Ok(IcmpMessage::Unrecognized { icmp_type: ICMP_TIME_EXCEEDED, code: 0 })
        );
    }

    #[test_case(&[]; "empty")]
    #[test_case(&[0, 0, 0xff]; "three bytes")]
    #[test_case(&[0, 0, 0xff, 0xff, 0, 0, 0]; "seven bytes")]
    fn test_decode_truncated(bytes: &[u8]) {
        assert!(matches!(decode(bytes), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn test_decode_truncated_quote() {
        let mut bytes = vec![ICMP_TIME_EXCEEDED, 0, 0, 0, 0, 0, 0, 0, 0x45, 0, 0, 0];
        let sum = checksum(&bytes);
        BigEndian::write_u16(&mut bytes[2..4], sum);
        assert!(matches!(decode(&bytes), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn test_single_bit_flips_rejected() {
        let packets = [
            echo_reply(ProbeId::new(0xbeef, 12), &echo_payload(32, SystemTime::now())),
            quoting_message(ICMP_TIME_EXCEEDED, 0, ProbeId::new(0xbeef, 13)),
        ];
        for packet in packets {
            for bit in 0..packet.len() * 8 {
                let mut flipped = packet.clone();
                flipped[bit / 8] ^= 1 << (bit % 8);
                assert!(decode(&flipped).is_err(), "bit {bit} flip accepted");
            }
        }
    }

    #[test]
    fn test_echo_payload_carries_timestamp() {
        let sent_at = UNIX_EPOCH + std::time::Duration::from_nanos(0x0102_0304_0506_0708);
        let payload = echo_payload(12, sent_at);
        assert_eq!(&payload[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&payload[8..], &[PAYLOAD_FILL; 4]);
    }

    #[test]
    fn test_strip_ipv4_header() {
        let reply = echo_reply(ProbeId::new(1, 1), &[0x61; 8]);
        let mut datagram = vec![0u8; 24];
        datagram[0] = 0x46;
        datagram.extend_from_slice(&reply);
        assert_eq!(strip_ipv4_header(&datagram), &reply[..]);
        assert_eq!(strip_ipv4_header(&reply), &reply[..]);
    }
}
