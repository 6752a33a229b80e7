use crate::config::TraceConfig;
use crate::error::{Result, TraceRouteError};
use crate::icmp::{
    ChannelFactory, IcmpMessage, ProbeChannel, ProbeId, ProbeReply, Reception, ReplyKind, decode,
    echo_payload, encode_echo_request, strip_ipv4_header,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

const RECV_BUFFER_SIZE: usize = 1500;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    id: ProbeId,
    sent_at: Instant,
}

/// Where inbound datagrams come from.
trait DatagramSource {
    /// Wait at most `timeout` for one datagram and its sender.
    fn recv_datagram(&mut self, timeout: Duration) -> io::Result<(Vec<u8>, Option<IpAddr>)>;
}

struct RawEndpoint {
    socket: Socket,
    buffer: Vec<MaybeUninit<u8>>,
}

impl DatagramSource for RawEndpoint {
    fn recv_datagram(&mut self, timeout: Duration) -> io::Result<(Vec<u8>, Option<IpAddr>)> {
        // a zero timeval disables the timeout
        self.socket.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        let (len, from) = self.socket.recv_from(&mut self.buffer)?;
        let source = from.as_socket().map(|addr| addr.ip());
        Ok((initialized(&self.buffer[..len]), source))
    }
}

/// Tracks the one probe awaiting a reply.
#[derive(Debug, Default)]
struct Correlator {
    outstanding: Option<Outstanding>,
}

impl Correlator {
    fn expect(&mut self, id: ProbeId, sent_at: Instant) {
        self.outstanding = Some(Outstanding { id, sent_at });
    }

    /// Feed one raw datagram. A match settles the outstanding probe.
    fn accept(
        &mut self,
        datagram: &[u8],
        source: IpAddr,
        received_at: Instant,
    ) -> Option<ProbeReply> {
        let data = strip_ipv4_header(datagram);
        let reply = correlate(data, source, self.outstanding.as_ref(), received_at)?;
        self.outstanding = None;
        Some(reply)
    }
}

/// Raw IPv4 ICMP socket.
pub struct IcmpSocket {
    endpoint: RawEndpoint,
    payload_size: usize,
    correlator: Correlator,
}

impl IcmpSocket {
    pub fn open(payload_size: usize) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(|e| TraceRouteError::CannotOpenSocket(Arc::new(e)))?;
        socket
            .set_nonblocking(false)
            .map_err(|e| TraceRouteError::CannotOpenSocket(Arc::new(e)))?;

        Ok(Self {
            endpoint: RawEndpoint {
                socket,
                buffer: vec![MaybeUninit::uninit(); RECV_BUFFER_SIZE],
            },
            payload_size,
            correlator: Correlator::default(),
        })
    }
}

impl ProbeChannel for IcmpSocket {
    fn set_ttl(&mut self, ttl: u8) -> Result<()> {
        log::debug!("Setting TTL to {}", ttl);
        self.endpoint
            .socket
            .set_ttl(u32::from(ttl))
            .map_err(|e| TraceRouteError::SetSocketOptionFailed { ttl, source: Arc::new(e) })
    }

    fn send_probe(&mut self, destination: IpAddr, id: ProbeId) -> Result<()> {
        let payload = echo_payload(self.payload_size, SystemTime::now());
        let packet = encode_echo_request(id, &payload)?;
        let target = SocketAddr::new(destination, 0);

        log::debug!(
            "Sending ICMP probe to {}: id={} seq={} {} bytes",
            destination,
            id.identifier,
            id.sequence,
            packet.len()
        );
        let sent_at = Instant::now();
        self.endpoint
            .socket
            .send_to(&packet, &target.into())
            .map_err(|e| TraceRouteError::SendingError { addr: destination, source: Arc::new(e) })?;
        self.correlator.expect(id, sent_at);
        Ok(())
    }

    fn receive_with_deadline(&mut self, deadline: Instant) -> Result<Reception> {
        receive_until(&mut self.endpoint, &mut self.correlator, deadline)
    }
}

/// Read datagrams until one settles the outstanding probe or `deadline` passes.
///
/// Foreign, stale, corrupt and unrecognized traffic is skipped without
/// extending the deadline.
fn receive_until<S: DatagramSource>(
    source: &mut S,
    correlator: &mut Correlator,
    deadline: Instant,
) -> Result<Reception> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Reception::Timeout);
        }

        let (datagram, from) = match source.recv_datagram(remaining) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) || e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TraceRouteError::CannotReceiveData(Arc::new(e))),
        };
        let received_at = Instant::now();

        let Some(from) = from else {
            continue;
        };
        log::trace!("Received {} bytes from {}", datagram.len(), from);

        if let Some(reply) = correlator.accept(&datagram, from, received_at) {
            return Ok(Reception::Reply(reply));
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn initialized(buffer: &[MaybeUninit<u8>]) -> Vec<u8> {
    // recv_from reports how many leading bytes it wrote
    buffer.iter().map(|b| unsafe { b.assume_init() }).collect()
}

/// Match an inbound ICMP message against the outstanding probe.
fn correlate(
    data: &[u8],
    source: IpAddr,
    outstanding: Option<&Outstanding>,
    received_at: Instant,
) -> Option<ProbeReply> {
    let message = match decode(data) {
        Ok(message) => message,
        Err(e) => {
            log::trace!("Discarding packet from {}: {}", source, e);
            return None;
        }
    };
    let (id, kind) = match message {
        IcmpMessage::EchoReply(id) => (id, ReplyKind::EchoReply),
        IcmpMessage::TimeExceeded(id) => (id, ReplyKind::TimeExceeded),
        IcmpMessage::DestinationUnreachable { original, code } => {
            (original, ReplyKind::DestinationUnreachable(code))
        }
        IcmpMessage::Unrecognized { icmp_type, code } => {
            log::debug!(
                "Received unknown packet from {}: type={} code={}",
                source,
                icmp_type,
                code
            );
            return None;
        }
    };

    let outstanding = outstanding?;
    if id.identifier != outstanding.id.identifier {
        log::trace!("Ignoring foreign ICMP traffic from {} (id={})", source, id.identifier);
        return None;
    }
    if id.sequence != outstanding.id.sequence {
        log::debug!(
            "Discarding stale reply from {}: seq={} expected={}",
            source,
            id.sequence,
            outstanding.id.sequence
        );
        return None;
    }

    Some(ProbeReply {
        source,
        kind,
        sequence: id.sequence,
        round_trip: received_at.saturating_duration_since(outstanding.sent_at),
    })
}

/// Opens a raw [`IcmpSocket`] per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSocketFactory;

impl ChannelFactory for RawSocketFactory {
    type Channel = IcmpSocket;

    fn open(&self, config: &TraceConfig) -> Result<IcmpSocket> {
        IcmpSocket::open(config.payload_size)
    }
}

// Helper function to check if raw socket privileges are available
pub fn check_raw_socket_privileges() -> bool {
    IcmpSocket::open(crate::config::DEFAULT_PAYLOAD_SIZE).is_ok()
}
