pub mod packet;
pub mod socket;

pub use packet::*;
pub use socket::*;

use crate::config::TraceConfig;
use crate::error::Result;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// A reply correlated with the probe currently in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReply {
    pub source: IpAddr,
    pub kind: ReplyKind,
    pub sequence: u16,
    pub round_trip: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// An intermediate router dropped the probe.
    TimeExceeded,
    /// The destination answered.
    EchoReply,
    DestinationUnreachable(u8),
}

impl std::fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyKind::TimeExceeded => write!(f, "TTL exceeded in transit"),
            ReplyKind::EchoReply => write!(f, "Echo reply"),
            ReplyKind::DestinationUnreachable(code) => {
                write!(f, "Destination unreachable (code {})", code)
            }
        }
    }
}

/// Outcome of waiting for a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reception {
    Reply(ProbeReply),
    Timeout,
}

/// Sends probes at a given TTL and waits for their replies.
///
/// The TTL is channel state, so one channel serves one sequential sweep.
pub trait ProbeChannel {
    fn set_ttl(&mut self, ttl: u8) -> Result<()>;

    /// Send one Echo Request. It becomes the only probe replies are matched against.
    fn send_probe(&mut self, destination: IpAddr, id: ProbeId) -> Result<()>;

    /// Wait until a reply to the outstanding probe arrives or `deadline` passes.
    ///
    /// Foreign, stale and unrecognized packets are skipped without ending the wait.
    fn receive_with_deadline(&mut self, deadline: Instant) -> Result<Reception>;
}

/// Opens one channel per run.
pub trait ChannelFactory: Send + Sync + 'static {
    type Channel: ProbeChannel + Send + 'static;

    fn open(&self, config: &TraceConfig) -> Result<Self::Channel>;
}
