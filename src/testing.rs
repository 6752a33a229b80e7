//! In-memory channel and resolver for exercising the engine and manager.

use crate::config::TraceConfig;
use crate::dns::Resolver;
use crate::error::{Result, TraceRouteError};
use crate::icmp::{ChannelFactory, ProbeChannel, ProbeId, ProbeReply, Reception, ReplyKind};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const DESTINATION: &str = "93.184.216.34";

pub(crate) fn addr(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// What the network does with one probe.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Silent,
    Hop(&'static str),
    Echo(&'static str),
    Unreachable(&'static str, u8),
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedChannel {
    script: HashMap<u8, VecDeque<Step>>,
    ttl: u8,
    outstanding: Option<ProbeId>,
    reply_delay: Duration,
    fail_ttl: Option<u8>,
    sent: Arc<Mutex<Vec<(u8, ProbeId)>>>,
}

impl ScriptedChannel {
    pub(crate) fn new() -> Self {
        Self {
            script: HashMap::new(),
            ttl: 0,
            outstanding: None,
            reply_delay: Duration::from_millis(1),
            fail_ttl: None,
            sent: Arc::default(),
        }
    }

    /// Probes at `ttl` meet `steps` in order, then silence.
    pub(crate) fn at(mut self, ttl: u8, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.insert(ttl, steps.into_iter().collect());
        self
    }

    pub(crate) fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub(crate) fn fail_set_ttl_at(mut self, ttl: u8) -> Self {
        self.fail_ttl = Some(ttl);
        self
    }

    /// Every probe sent so far, with the TTL it went out at.
    pub(crate) fn sent(&self) -> Arc<Mutex<Vec<(u8, ProbeId)>>> {
        self.sent.clone()
    }
}

fn sleep_until(deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if !remaining.is_zero() {
        thread::sleep(remaining);
    }
}

impl ProbeChannel for ScriptedChannel {
    fn set_ttl(&mut self, ttl: u8) -> Result<()> {
        if self.fail_ttl == Some(ttl) {
            return Err(TraceRouteError::SetSocketOptionFailed {
                ttl,
                source: Arc::new(io::Error::from(io::ErrorKind::InvalidInput)),
            });
        }
        self.ttl = ttl;
        Ok(())
    }

    fn send_probe(&mut self, _destination: IpAddr, id: ProbeId) -> Result<()> {
        self.sent.lock().unwrap().push((self.ttl, id));
        self.outstanding = Some(id);
        Ok(())
    }

    fn receive_with_deadline(&mut self, deadline: Instant) -> Result<Reception> {
        let Some(id) = self.outstanding.take() else {
            sleep_until(deadline);
            return Ok(Reception::Timeout);
        };
        let step = self
            .script
            .get_mut(&self.ttl)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Silent);
        let (source, kind) = match step {
            Step::Silent => {
                sleep_until(deadline);
                return Ok(Reception::Timeout);
            }
            Step::Hop(source) => (source, ReplyKind::TimeExceeded),
            Step::Echo(source) => (source, ReplyKind::EchoReply),
            Step::Unreachable(source, code) => (source, ReplyKind::DestinationUnreachable(code)),
        };
        let arrives = Instant::now() + self.reply_delay;
        if arrives > deadline {
            sleep_until(deadline);
            return Ok(Reception::Timeout);
        }
        sleep_until(arrives);
        Ok(Reception::Reply(ProbeReply {
            source: addr(source),
            kind,
            sequence: id.sequence,
            round_trip: self.reply_delay,
        }))
    }
}

/// Hands out clones of one scripted channel and counts how often it was asked.
pub(crate) struct ScriptedFactory {
    template: ScriptedChannel,
    opens: Arc<AtomicUsize>,
    deny: bool,
}

impl ScriptedFactory {
    pub(crate) fn new(template: ScriptedChannel) -> Self {
        Self {
            template,
            opens: Arc::default(),
            deny: false,
        }
    }

    pub(crate) fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new(ScriptedChannel::new())
        }
    }

    pub(crate) fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl ChannelFactory for ScriptedFactory {
    type Channel = ScriptedChannel;

    fn open(&self, _config: &TraceConfig) -> Result<ScriptedChannel> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(TraceRouteError::CannotOpenSocket(Arc::new(io::Error::from(
                io::ErrorKind::PermissionDenied,
            ))));
        }
        Ok(self.template.clone())
    }
}

#[derive(Debug, Default)]
pub(crate) struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StaticResolver {
    pub(crate) fn with(mut self, host: &str, address: &str) -> Self {
        self.hosts.insert(host.to_string(), addr(address));
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, hostname: &str) -> Result<IpAddr> {
        self.hosts
            .get(hostname)
            .copied()
            .ok_or_else(|| TraceRouteError::cannot_find_host(hostname, "not in test resolver"))
    }
}
