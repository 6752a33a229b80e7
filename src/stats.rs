use crate::result::{HopRecord, TraceRouteResult};
use crate::utils::format_time;

#[derive(Debug, Clone)]
pub struct TraceStatistics {
    pub hops: u32,
    pub responded: u32,
    pub silent: u32,
    pub min_time: f64,
    pub max_time: f64,
    pub total_time: f64,
}

impl TraceStatistics {
    pub fn new() -> Self {
        Self {
            hops: 0,
            responded: 0,
            silent: 0,
            min_time: f64::INFINITY,
            max_time: 0.0,
            total_time: 0.0,
        }
    }

    pub fn from_result(result: &TraceRouteResult) -> Self {
        let mut stats = Self::new();
        for hop in result.hops() {
            stats.record(hop);
        }
        stats
    }

    pub fn record(&mut self, hop: &HopRecord) {
        self.hops += 1;
        match hop.round_trip_ms {
            Some(time_ms) => {
                self.responded += 1;
                self.total_time += time_ms;
                self.min_time = self.min_time.min(time_ms);
                self.max_time = self.max_time.max(time_ms);
            }
            None => self.silent += 1,
        }
    }

    pub fn silent_percentage(&self) -> f64 {
        if self.hops == 0 {
            return 0.0;
        }
        (self.silent as f64 / self.hops as f64) * 100.0
    }

    pub fn average_time(&self) -> f64 {
        if self.responded == 0 {
            return 0.0;
        }
        self.total_time / self.responded as f64
    }

    pub fn format_summary(&self, result: &TraceRouteResult) -> String {
        let outcome = match (result.completed(), result.destination_hop()) {
            (true, Some(_)) => "destination reached",
            (true, None) => "max hops exhausted",
            (false, _) => "incomplete",
        };

        let mut summary = format!(
            "\nTrace to {} {} in {:.2}s:\n    \
             Hops: {}, responded = {}, silent = {} ({:.0}% silent)\n",
            result.hostname(),
            outcome,
            result.elapsed_secs(),
            self.hops,
            self.responded,
            self.silent,
            self.silent_percentage()
        );

        if self.responded > 0 {
            summary.push_str(&format!(
                "Round trip times:\n    min = {}, max = {}, avg = {}\n",
                format_time(self.min_time),
                format_time(self.max_time),
                format_time(self.average_time())
            ));
        }

        summary
    }
}

impl Default for TraceStatistics {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_hop(hop: &HopRecord, resolved_name: Option<&str>) -> String {
    let (Some(address), Some(time_ms)) = (hop.address, hop.round_trip_ms) else {
        return format!("{:>3}  *", hop.ttl);
    };
    let source_display = match resolved_name {
        Some(name) => format!("{} [{}]", name, address),
        None => address.to_string(),
    };
    format!("{:>3}  {:>8}  {}", hop.ttl, format_time(time_ms), source_display)
}

pub fn format_header(target: &str, resolved_ip: &str, max_ttl: u8) -> String {
    if target == resolved_ip {
        format!("Tracing route to {} over a maximum of {} hops:", target, max_ttl)
    } else {
        format!(
            "Tracing route to {} [{}] over a maximum of {} hops:",
            target, resolved_ip, max_ttl
        )
    }
}
