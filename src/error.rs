use crate::icmp::PacketError;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// A traceroute result.
pub type Result<T> = std::result::Result<T, TraceRouteError>;

/// A fatal traceroute error.
///
/// Every variant ends the run it occurs in. Lost probes and unknown packets
/// are not errors and never surface here.
#[derive(Error, Debug, Clone)]
pub enum TraceRouteError {
    #[error("cannot find host {host}: {reason}")]
    CannotFindHost { host: String, reason: String },
    #[error("cannot open raw ICMP socket: {0}. Root or CAP_NET_RAW may be required")]
    CannotOpenSocket(#[source] Arc<io::Error>),
    #[error("failed to set TTL {ttl}: {source}")]
    SetSocketOptionFailed { ttl: u8, source: Arc<io::Error> },
    #[error("failed to create ICMP packet: {0}")]
    CreatingIcmpPacketFailed(#[from] PacketError),
    #[error("failed to send probe to {addr}: {source}")]
    SendingError { addr: IpAddr, source: Arc<io::Error> },
    #[error("failed to receive data: {0}")]
    CannotReceiveData(#[source] Arc<io::Error>),
    #[error("invalid config: {0}")]
    BadConfig(String),
    #[error("traceroute engine has already run")]
    AlreadyRun,
}

/// Code reserved for packets that decode to nothing we understand.
///
/// Such packets are logged and skipped, so the code never appears on an error.
pub const RECEIVED_UNKNOWN_PACKET_CODE: i32 = 2004;

impl TraceRouteError {
    /// Stable numeric code for this error kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::CannotFindHost { .. } => 2000,
            Self::CannotOpenSocket(_) => 2001,
            Self::SetSocketOptionFailed { .. } => 2002,
            Self::CreatingIcmpPacketFailed(_) => 2003,
            Self::SendingError { .. } => 2005,
            Self::CannotReceiveData(_) => 2006,
            Self::BadConfig(_) => 2100,
            Self::AlreadyRun => 2101,
        }
    }

    pub(crate) fn cannot_find_host(host: &str, reason: impl ToString) -> Self {
        Self::CannotFindHost {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}
