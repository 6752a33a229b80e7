use crate::config::TraceConfig;
use crate::dns::{Resolver, SystemResolver};
use crate::engine::{TraceEvent, TraceRouteEngine};
use crate::error::{Result, TraceRouteError};
use crate::icmp::{ChannelFactory, RawSocketFactory};
use crate::result::{HopRecord, TraceRouteResult};
use crate::utils::generate_identifier;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

type Delivery = Result<Arc<TraceRouteResult>>;

/// Runs traceroutes by hostname, at most one at a time per host.
///
/// Callers asking for a host that is already being traced wait for that run
/// instead of starting another. Completed results are cached until
/// [`TraceConfig::cache_ttl`] passes. Cloning shares the same cache.
pub struct TraceRouteManager<R = SystemResolver, F = RawSocketFactory> {
    inner: Arc<Inner<R, F>>,
}

impl<R, F> Clone for TraceRouteManager<R, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<R, F> {
    resolver: R,
    factory: F,
    config: RwLock<TraceConfig>,
    entries: Mutex<HashMap<String, Entry>>,
}

enum Entry {
    InFlight(InFlight),
    Completed(Completed),
}

#[derive(Default)]
struct InFlight {
    waiters: Vec<oneshot::Sender<Delivery>>,
    watchers: Vec<UnboundedSender<TraceEvent>>,
    hops: Vec<HopRecord>,
    finished: Option<TraceEvent>,
}

impl InFlight {
    /// Bring a late watcher up to date, then keep it informed.
    fn watch(&mut self, watcher: UnboundedSender<TraceEvent>) {
        let caught_up = self
            .hops
            .iter()
            .cloned()
            .map(TraceEvent::Hop)
            .chain(self.finished.clone())
            .all(|event| watcher.send(event).is_ok());
        if caught_up {
            self.watchers.push(watcher);
        }
    }

    fn record(&mut self, event: TraceEvent) {
        self.watchers.retain(|watcher| watcher.send(event.clone()).is_ok());
        match event {
            TraceEvent::Hop(hop) => self.hops.push(hop),
            finished @ TraceEvent::Finished { .. } => self.finished = Some(finished),
        }
    }
}

struct Completed {
    result: Arc<TraceRouteResult>,
    finished_at: Instant,
}

impl Completed {
    fn is_fresh(&self, cache_ttl: Option<Duration>) -> bool {
        cache_ttl.is_none_or(|ttl| self.finished_at.elapsed() < ttl)
    }

    fn replay(&self, watcher: &UnboundedSender<TraceEvent>) {
        let finished = TraceEvent::Finished {
            completed: self.result.completed(),
            elapsed: Duration::from_secs_f64(self.result.elapsed_secs()),
        };
        let hops = self.result.hops().iter().cloned().map(TraceEvent::Hop);
        for event in hops.chain([finished]) {
            if watcher.send(event).is_err() {
                break;
            }
        }
    }
}

impl TraceRouteManager {
    /// A manager probing over raw sockets with the system resolver.
    pub fn new(config: TraceConfig) -> Self {
        Self::with_parts(config, SystemResolver, RawSocketFactory)
    }
}

impl<R: Resolver, F: ChannelFactory> TraceRouteManager<R, F> {
    pub fn with_parts(config: TraceConfig, resolver: R, factory: F) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                factory,
                config: RwLock::new(config),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> TraceConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration used by runs started from now on.
    pub fn set_config(&self, config: TraceConfig) -> Result<()> {
        config.validate()?;
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Trace `host`, sharing an in-flight or cached run when there is one.
    pub async fn traceroute(&self, host: &str) -> Result<Arc<TraceRouteResult>> {
        self.request(host, None).await
    }

    /// Like [`Self::traceroute`], also streaming the run's events to `progress`.
    ///
    /// Hops already known when the call joins are replayed first. Runs that fail
    /// before probing starts send nothing.
    pub async fn traceroute_with_progress(
        &self,
        host: &str,
        progress: UnboundedSender<TraceEvent>,
    ) -> Result<Arc<TraceRouteResult>> {
        self.request(host, Some(progress)).await
    }

    /// The cached result for `host`, if still fresh.
    pub fn cached(&self, host: &str) -> Option<Arc<TraceRouteResult>> {
        let cache_ttl = self.inner.config.read().cache_ttl;
        match self.inner.entries.lock().get(host) {
            Some(Entry::Completed(done)) if done.is_fresh(cache_ttl) => Some(done.result.clone()),
            _ => None,
        }
    }

    /// Drop the cached result for `host`. In-flight runs are unaffected.
    pub fn invalidate(&self, host: &str) -> bool {
        let mut entries = self.inner.entries.lock();
        if matches!(entries.get(host), Some(Entry::Completed(_))) {
            entries.remove(host);
            true
        } else {
            false
        }
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        self.inner
            .entries
            .lock()
            .retain(|_, entry| matches!(entry, Entry::InFlight(_)));
    }

    async fn request(
        &self,
        host: &str,
        progress: Option<UnboundedSender<TraceEvent>>,
    ) -> Result<Arc<TraceRouteResult>> {
        let delivery = {
            let config = self.config();
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(host) {
                Some(Entry::Completed(done)) if done.is_fresh(config.cache_ttl) => {
                    log::debug!("Serving traceroute to {} from cache", host);
                    if let Some(progress) = &progress {
                        done.replay(progress);
                    }
                    return Ok(done.result.clone());
                }
                Some(Entry::InFlight(run)) => {
                    log::debug!("Joining in-flight traceroute to {}", host);
                    let (tx, rx) = oneshot::channel();
                    run.waiters.push(tx);
                    if let Some(progress) = progress {
                        run.watch(progress);
                    }
                    rx
                }
                _ => {
                    log::debug!("Starting traceroute to {}", host);
                    let (tx, rx) = oneshot::channel();
                    let mut run = InFlight::default();
                    run.waiters.push(tx);
                    run.watchers.extend(progress);
                    entries.insert(host.to_string(), Entry::InFlight(run));
                    tokio::spawn(execute(self.inner.clone(), host.to_string(), config));
                    rx
                }
            }
        };
        delivery.await.unwrap_or_else(|_| Err(worker_lost()))
    }
}

async fn execute<R: Resolver, F: ChannelFactory>(
    inner: Arc<Inner<R, F>>,
    host: String,
    config: TraceConfig,
) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let worker = inner.clone();
    let hostname = host.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let destination = worker.resolver.resolve(&hostname)?;
        let channel = worker.factory.open(&config)?;
        let identifier = generate_identifier();
        TraceRouteEngine::new(channel, config, hostname, destination, identifier)
            .with_events(events_tx)
            .run()
    });

    while let Some(event) = events_rx.recv().await {
        if let Some(Entry::InFlight(run)) = inner.entries.lock().get_mut(&host) {
            run.record(event);
        }
    }
    let outcome = handle.await.unwrap_or_else(|_| Err(worker_lost()));
    inner.finish(&host, outcome);
}

impl<R, F> Inner<R, F> {
    /// Cache a successful run and answer everyone waiting on it.
    fn finish(&self, host: &str, outcome: Result<TraceRouteResult>) {
        let mut entries = self.entries.lock();
        let Some(Entry::InFlight(run)) = entries.remove(host) else {
            return;
        };
        let delivery = match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                entries.insert(
                    host.to_string(),
                    Entry::Completed(Completed {
                        result: result.clone(),
                        finished_at: Instant::now(),
                    }),
                );
                Ok(result)
            }
            Err(e) => {
                log::warn!("Traceroute to {} failed: {}", host, e);
                Err(e)
            }
        };
        log::debug!("Delivering traceroute to {} to {} waiter(s)", host, run.waiters.len());
        for waiter in run.waiters {
            let _ = waiter.send(delivery.clone());
        }
    }
}

fn worker_lost() -> TraceRouteError {
    TraceRouteError::CannotReceiveData(Arc::new(io::Error::other("traceroute worker stopped")))
}
