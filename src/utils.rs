use std::process;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU16, Ordering};

static IDENTIFIER_BASE: OnceLock<u16> = OnceLock::new();
static IDENTIFIER_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Generate an identifier for a traceroute run.
///
/// Starts from a random value per process and steps once per call, so runs
/// in flight together never share an identifier.
pub fn generate_identifier() -> u16 {
    use rand::Rng;
    let base = *IDENTIFIER_BASE.get_or_init(|| rand::thread_rng().r#gen());
    base.wrapping_add(IDENTIFIER_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Detailed privilege check with error reporting
pub fn check_privileges_detailed() -> anyhow::Result<()> {
    if crate::icmp::socket::check_raw_socket_privileges() {
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "cannot open a raw ICMP socket. Possible causes:\n\
        1. Not running as root - try sudo\n\
        2. Missing capability - grant it with `setcap cap_net_raw+ep <binary>`\n\
        3. Raw sockets blocked by a sandbox or container policy"
    ))
}

/// Print error message and exit with error code
pub fn exit_with_error(message: &str, code: i32) -> ! {
    eprintln!("hoptrace: {}", message);
    process::exit(code);
}

/// Format a round-trip time for display
pub fn format_time(ms: f64) -> String {
    if ms < 1.0 {
        "<1 ms".to_string()
    } else {
        format!("{:.0} ms", ms)
    }
}

/// Handle Ctrl+C signal for graceful shutdown
pub fn setup_signal_handler() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    rx
}
