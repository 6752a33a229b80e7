use crate::error::{Result, TraceRouteError};
use crate::icmp::{MAX_PAYLOAD_SIZE, TIMESTAMP_SIZE};
use std::time::Duration;

pub const DEFAULT_MAX_TTL: u8 = 30;
pub const DEFAULT_TRY_COUNT: u32 = 3;
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PAYLOAD_SIZE: usize = 32;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Longest accepted response or overall timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings for a traceroute run.
///
/// A run takes a copy when it starts; later changes only affect new runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    /// Highest TTL probed before giving up.
    pub max_ttl: u8,
    /// Probes sent at one TTL before the hop is declared silent.
    pub try_count: u32,
    /// How long to wait for each probe's reply.
    pub response_timeout: Duration,
    /// Wall-clock budget for the whole run.
    pub overall_timeout: Duration,
    /// Echo Request payload length in bytes.
    pub payload_size: usize,
    /// How long a completed result is served from cache. `None` keeps it forever.
    pub cache_ttl: Option<Duration>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_ttl: DEFAULT_MAX_TTL,
            try_count: DEFAULT_TRY_COUNT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            cache_ttl: Some(DEFAULT_CACHE_TTL),
        }
    }
}

impl TraceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ttl == 0 {
            return Err(bad_config("max TTL must be at least 1"));
        }
        if self.try_count == 0 {
            return Err(bad_config("try count must be at least 1"));
        }
        check_timeout("response timeout", self.response_timeout)?;
        check_timeout("overall timeout", self.overall_timeout)?;
        if self.payload_size < TIMESTAMP_SIZE || self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(bad_config(format!(
                "payload size must be in {}..={} bytes, got {}",
                TIMESTAMP_SIZE, MAX_PAYLOAD_SIZE, self.payload_size
            )));
        }
        Ok(())
    }
}

fn check_timeout(name: &str, timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(bad_config(format!("{} must be greater than 0", name)));
    }
    if timeout > MAX_TIMEOUT {
        return Err(bad_config(format!(
            "{} must be at most {}s, got {}s",
            name,
            MAX_TIMEOUT.as_secs(),
            timeout.as_secs()
        )));
    }
    Ok(())
}

fn bad_config(reason: impl Into<String>) -> TraceRouteError {
    TraceRouteError::BadConfig(reason.into())
}
