use anyhow::Context;
use hoptrace::cli::{self, TraceArgs};
use hoptrace::{TraceEvent, TraceRouteManager, TraceRouteResult, dns, stats, utils};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Enable debug logging if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }

    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => match e.downcast_ref::<clap::Error>() {
            Some(clap_error) => clap_error.exit(),
            None => utils::exit_with_error(&e.to_string(), 1),
        },
    };

    let config = args.to_config();
    if let Err(e) = config.validate() {
        utils::exit_with_error(&e.to_string(), 1);
    }

    if let Err(e) = utils::check_privileges_detailed() {
        utils::exit_with_error(&e.to_string(), 1);
    }

    let manager = TraceRouteManager::new(config);
    let mut shutdown_signal = utils::setup_signal_handler();

    tokio::select! {
        failures = trace_all(&manager, &args) => {
            if failures > 0 {
                std::process::exit(1);
            }
        }
        Ok(()) = &mut shutdown_signal => {
            eprintln!("hoptrace: interrupted");
            std::process::exit(130);
        }
    }
}

/// Trace every target concurrently and report each one. Returns the number of failures.
async fn trace_all(manager: &TraceRouteManager, args: &TraceArgs) -> usize {
    // A single target is printed as it goes; several are printed whole to keep them apart.
    let live = args.targets.len() == 1 && !args.json;
    let mut tasks = tokio::task::JoinSet::new();
    for (index, target) in args.targets.iter().enumerate() {
        let manager = manager.clone();
        let target = target.clone();
        let resolve = args.resolve_addresses;
        tasks.spawn(async move { (index, trace_target(&manager, &target, resolve, live).await) });
    }

    let mut outcomes = Vec::with_capacity(args.targets.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push((usize::MAX, Err(anyhow::anyhow!("trace task failed: {}", e)))),
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut failures = 0;
    let mut results = Vec::new();
    for (_, outcome) in outcomes {
        match outcome {
            Ok((result, report)) => {
                if !args.json {
                    print!("{}", report);
                }
                results.push(result);
            }
            Err(e) => {
                failures += 1;
                eprintln!("hoptrace: {:#}", e);
            }
        }
    }

    if args.json {
        let results: Vec<&TraceRouteResult> = results.iter().map(Arc::as_ref).collect();
        match serde_json::to_string_pretty(&results) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("hoptrace: cannot encode results: {}", e);
                failures += 1;
            }
        }
    }
    failures
}

/// Trace one target. Hop lines are printed immediately when `live`, otherwise
/// returned with the rest of the report.
async fn trace_target(
    manager: &TraceRouteManager,
    target: &str,
    resolve: bool,
    live: bool,
) -> anyhow::Result<(Arc<TraceRouteResult>, String)> {
    let max_ttl = manager.config().max_ttl;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut report = String::new();
    if live {
        // an unresolvable target is reported by the traceroute itself
        if let Some(address) = resolve_for_header(target).await {
            println!("{}\n", stats::format_header(target, &address.to_string(), max_ttl));
        }
    }

    let printer = async {
        let mut lines = String::new();
        while let Some(event) = rx.recv().await {
            let TraceEvent::Hop(hop) = event else {
                continue;
            };
            let name = match hop.address {
                Some(address) if resolve => dns::reverse_lookup(address).await,
                _ => None,
            };
            let line = stats::format_hop(&hop, name.as_deref());
            if live {
                println!("{}", line);
            } else {
                lines.push_str(&line);
                lines.push('\n');
            }
        }
        lines
    };

    let (result, lines) = tokio::join!(manager.traceroute_with_progress(target, tx), printer);
    let result = result.with_context(|| format!("traceroute to {} failed", target))?;

    if !live {
        report.push_str(&stats::format_header(target, &result.address().to_string(), max_ttl));
        report.push_str("\n\n");
        report.push_str(&lines);
    }
    let summary = stats::TraceStatistics::from_result(&result).format_summary(&result);
    report.push_str(&summary);
    if live {
        print!("{}", report);
        report.clear();
    }
    Ok((result, report))
}

async fn resolve_for_header(target: &str) -> Option<std::net::IpAddr> {
    let target = target.to_string();
    tokio::task::spawn_blocking(move || dns::resolve_hostname(&target).ok())
        .await
        .ok()
        .flatten()
}
