use crate::config::TraceConfig;
use crate::error::{Result, TraceRouteError};
use crate::icmp::{ProbeChannel, ProbeId, ProbeReply, Reception, ReplyKind};
use crate::result::{HopRecord, ResultBuilder, TraceRouteResult};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

const INITIAL_SEQUENCE: u16 = 1;

/// Progress of a run, in order: hops by ascending TTL, then one `Finished`.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Hop(HopRecord),
    Finished { completed: bool, elapsed: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Probing { ttl: u8 },
    DestinationReached,
    /// A Destination Unreachable answered our probe.
    Unreachable,
    MaxTtlExhausted,
    OverallTimedOut,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineState::Idle | EngineState::Probing { .. })
    }
}

enum TtlOutcome {
    Reply(ProbeReply),
    Silent,
    DeadlineExceeded,
}

/// Sweeps TTLs towards one destination over a single channel.
pub struct TraceRouteEngine<C> {
    channel: C,
    config: TraceConfig,
    hostname: String,
    destination: IpAddr,
    identifier: u16,
    next_sequence: u16,
    state: EngineState,
    events: Option<UnboundedSender<TraceEvent>>,
}

impl<C: ProbeChannel> TraceRouteEngine<C> {
    pub fn new(
        channel: C,
        config: TraceConfig,
        hostname: impl Into<String>,
        destination: IpAddr,
        identifier: u16,
    ) -> Self {
        Self {
            channel,
            config,
            hostname: hostname.into(),
            destination,
            identifier,
            next_sequence: INITIAL_SEQUENCE,
            state: EngineState::Idle,
            events: None,
        }
    }

    /// Stream [`TraceEvent`]s to `events` while running.
    pub fn with_events(mut self, events: UnboundedSender<TraceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run the sweep to a terminal state. Blocks the calling thread.
    ///
    /// Channel errors end the run immediately; an overall timeout returns the
    /// hops gathered so far with the completed flag cleared.
    pub fn run(&mut self) -> Result<TraceRouteResult> {
        if self.state != EngineState::Idle {
            return Err(TraceRouteError::AlreadyRun);
        }
        self.config.validate()?;

        let started = Instant::now();
        let overall_deadline = started
            .checked_add(self.config.overall_timeout)
            .ok_or_else(|| TraceRouteError::BadConfig("overall timeout is out of range".into()))?;
        let mut builder = ResultBuilder::new(self.hostname.clone(), self.destination);
        log::debug!(
            "Tracing route to {} [{}], {} hops max",
            self.hostname,
            self.destination,
            self.config.max_ttl
        );

        self.state = EngineState::Probing { ttl: 1 };
        while let EngineState::Probing { ttl } = self.state {
            if Instant::now() >= overall_deadline {
                self.state = EngineState::OverallTimedOut;
                break;
            }
            let outcome = match self.probe_ttl(ttl, overall_deadline) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::debug!("Traceroute to {} failed at TTL {}: {}", self.hostname, ttl, e);
                    self.state = EngineState::Failed;
                    self.emit(TraceEvent::Finished {
                        completed: false,
                        elapsed: started.elapsed(),
                    });
                    return Err(e);
                }
            };
            self.state = match outcome {
                TtlOutcome::DeadlineExceeded => EngineState::OverallTimedOut,
                TtlOutcome::Silent => {
                    self.record(&mut builder, HopRecord::silent(ttl));
                    self.advance(ttl)
                }
                TtlOutcome::Reply(reply) => {
                    let next = match reply.kind {
                        ReplyKind::EchoReply => EngineState::DestinationReached,
                        ReplyKind::DestinationUnreachable(_) => EngineState::Unreachable,
                        ReplyKind::TimeExceeded => self.advance(ttl),
                    };
                    let hop = HopRecord::from_reply(ttl, &reply, self.destination);
                    self.record(&mut builder, hop);
                    next
                }
            };
        }

        let completed = match self.state {
            EngineState::DestinationReached | EngineState::MaxTtlExhausted => true,
            EngineState::Unreachable => {
                builder.hops().last().is_some_and(|hop| hop.reached_destination)
            }
            _ => false,
        };
        let elapsed = started.elapsed();
        log::debug!(
            "Traceroute to {} finished: {:?} after {} hops in {:.3}s",
            self.hostname,
            self.state,
            builder.hops().len(),
            elapsed.as_secs_f64()
        );
        self.emit(TraceEvent::Finished { completed, elapsed });
        Ok(builder.seal(completed, elapsed))
    }

    fn probe_ttl(&mut self, ttl: u8, overall_deadline: Instant) -> Result<TtlOutcome> {
        self.channel.set_ttl(ttl)?;
        for attempt in 1..=self.config.try_count {
            let id = ProbeId::new(self.identifier, self.next_sequence);
            self.next_sequence = self.next_sequence.wrapping_add(1);
            self.channel.send_probe(self.destination, id)?;

            let deadline = Instant::now()
                .checked_add(self.config.response_timeout)
                .map_or(overall_deadline, |deadline| deadline.min(overall_deadline));
            if let Reception::Reply(reply) = self.channel.receive_with_deadline(deadline)? {
                log::debug!(
                    "TTL {}: {} from {} in {:.3}ms",
                    ttl,
                    reply.kind,
                    reply.source,
                    reply.round_trip.as_secs_f64() * 1000.0
                );
                return Ok(TtlOutcome::Reply(reply));
            }
            log::debug!("TTL {}: no reply to attempt {}/{}", ttl, attempt, self.config.try_count);
            if Instant::now() >= overall_deadline {
                return Ok(TtlOutcome::DeadlineExceeded);
            }
        }
        Ok(TtlOutcome::Silent)
    }

    fn advance(&self, ttl: u8) -> EngineState {
        if ttl >= self.config.max_ttl {
            EngineState::MaxTtlExhausted
        } else {
            EngineState::Probing { ttl: ttl + 1 }
        }
    }

    fn record(&self, builder: &mut ResultBuilder, hop: HopRecord) {
        self.emit(TraceEvent::Hop(hop.clone()));
        builder.push(hop);
    }

    fn emit(&self, event: TraceEvent) {
        if let Some(events) = &self.events {
            // a dropped receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}
