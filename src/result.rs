use crate::icmp::{ProbeReply, ReplyKind};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Outcome of one TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopRecord {
    #[serde(rename = "TTL")]
    pub ttl: u8,
    /// `None` for a silent hop.
    #[serde(rename = "IpAddress")]
    pub address: Option<IpAddr>,
    #[serde(rename = "RoundTripTime")]
    pub round_trip_ms: Option<f64>,
    #[serde(rename = "ReachedDestination")]
    pub reached_destination: bool,
}

impl HopRecord {
    pub fn silent(ttl: u8) -> Self {
        Self {
            ttl,
            address: None,
            round_trip_ms: None,
            reached_destination: false,
        }
    }

    pub fn from_reply(ttl: u8, reply: &ProbeReply, destination: IpAddr) -> Self {
        let reached_destination = match reply.kind {
            ReplyKind::EchoReply => true,
            ReplyKind::TimeExceeded => false,
            ReplyKind::DestinationUnreachable(_) => reply.source == destination,
        };
        Self {
            ttl,
            address: Some(reply.source),
            round_trip_ms: Some(reply.round_trip.as_secs_f64() * 1000.0),
            reached_destination,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.address.is_none()
    }
}

/// Hops collected so far by a running engine.
#[derive(Debug)]
pub struct ResultBuilder {
    hostname: String,
    address: IpAddr,
    hops: Vec<HopRecord>,
}

impl ResultBuilder {
    pub fn new(hostname: impl Into<String>, address: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            address,
            hops: Vec::new(),
        }
    }

    /// Append the next hop. TTLs must arrive as 1, 2, 3, ...
    pub fn push(&mut self, hop: HopRecord) {
        debug_assert_eq!(usize::from(hop.ttl), self.hops.len() + 1);
        self.hops.push(hop);
    }

    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    pub fn seal(self, completed: bool, elapsed: Duration) -> TraceRouteResult {
        TraceRouteResult {
            hostname: self.hostname,
            address: self.address,
            hops: self.hops,
            completed,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}

/// A finished traceroute. Read-only once sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRouteResult {
    #[serde(rename = "HostName")]
    hostname: String,
    #[serde(rename = "IpAddress")]
    address: IpAddr,
    #[serde(rename = "ResultArray")]
    hops: Vec<HopRecord>,
    #[serde(rename = "CompletedFlag")]
    completed: bool,
    #[serde(rename = "TotalRunTimeSec")]
    elapsed_secs: f64,
}

impl TraceRouteResult {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    /// True when the destination replied or every TTL up to the maximum was tried.
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn destination_hop(&self) -> Option<&HopRecord> {
        self.hops.last().filter(|hop| hop.reached_destination)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
