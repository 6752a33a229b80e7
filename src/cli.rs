use crate::config::TraceConfig;
use clap::{Arg, ArgAction, Command};
use std::ffi::OsString;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct TraceArgs {
    pub targets: Vec<String>,
    pub max_ttl: Option<u8>,
    pub try_count: Option<u32>,
    pub timeout: Option<u64>,
    pub overall_timeout: Option<u64>,
    pub size: Option<usize>,
    pub resolve_addresses: bool,
    pub json: bool,
}

impl TraceArgs {
    /// Defaults overlaid with whatever was given on the command line.
    pub fn to_config(&self) -> TraceConfig {
        let mut config = TraceConfig::default();
        if let Some(max_ttl) = self.max_ttl {
            config.max_ttl = max_ttl;
        }
        if let Some(try_count) = self.try_count {
            config.try_count = try_count;
        }
        if let Some(timeout) = self.timeout {
            config.response_timeout = Duration::from_millis(timeout);
        }
        if let Some(overall) = self.overall_timeout {
            config.overall_timeout = Duration::from_secs(overall);
        }
        if let Some(size) = self.size {
            config.payload_size = size;
        }
        config
    }
}

pub fn build_cli() -> Command {
    Command::new("hoptrace")
        .version("0.1.0")
        .about("Trace the route to one or more hosts with ICMP Echo probes")
        .arg(
            Arg::new("targets")
                .help("Target hostnames or IPv4 addresses")
                .required(true)
                .num_args(1..)
                .index(1)
        )
        .arg(
            Arg::new("max_ttl")
                .short('m')
                .long("max-hops")
                .help("Maximum number of hops to probe")
                .value_name("hops")
                .value_parser(clap::value_parser!(u8).range(1..))
        )
        .arg(
            Arg::new("try_count")
                .short('q')
                .long("queries")
                .help("Probes per hop before it is marked silent")
                .value_name("count")
                .value_parser(clap::value_parser!(u32).range(1..))
        )
        .arg(
            Arg::new("timeout")
                .short('w')
                .long("wait")
                .help("Timeout in milliseconds to wait for each reply")
                .value_name("timeout")
                .value_parser(clap::value_parser!(u64).range(1..))
        )
        .arg(
            Arg::new("overall_timeout")
                .short('W')
                .long("overall")
                .help("Give up on a host after this many seconds")
                .value_name("seconds")
                .value_parser(clap::value_parser!(u64).range(1..))
        )
        .arg(
            Arg::new("size")
                .short('l')
                .help("Echo payload size in bytes")
                .value_name("size")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("resolve")
                .short('a')
                .help("Resolve hop addresses to hostnames")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print results as JSON")
                .action(ArgAction::SetTrue)
        )
}

pub fn parse_args() -> anyhow::Result<TraceArgs> {
    parse_args_from(std::env::args_os())
}

pub fn parse_args_from<I, T>(args: I) -> anyhow::Result<TraceArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;

    let args = TraceArgs {
        targets: matches
            .get_many::<String>("targets")
            .map(|targets| targets.cloned().collect())
            .unwrap_or_default(),
        max_ttl: matches.get_one::<u8>("max_ttl").copied(),
        try_count: matches.get_one::<u32>("try_count").copied(),
        timeout: matches.get_one::<u64>("timeout").copied(),
        overall_timeout: matches.get_one::<u64>("overall_timeout").copied(),
        size: matches.get_one::<usize>("size").copied(),
        resolve_addresses: matches.get_flag("resolve"),
        json: matches.get_flag("json"),
    };

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = parse_args_from(["hoptrace", "example.com"]).unwrap();
        assert_eq!(args.targets, vec!["example.com"]);
        assert!(!args.json);
        assert_eq!(args.to_config(), TraceConfig::default());
    }

    #[test]
    fn test_options() {
        let args = parse_args_from([
            "hoptrace", "-m", "12", "-q", "1", "-w", "250", "-W", "5", "-l", "64", "-a", "--json",
            "a.example", "b.example",
        ])
        .unwrap();
        assert_eq!(args.targets, vec!["a.example", "b.example"]);
        assert!(args.resolve_addresses);
        assert!(args.json);

        let config = args.to_config();
        assert_eq!(config.max_ttl, 12);
        assert_eq!(config.try_count, 1);
        assert_eq!(config.response_timeout, Duration::from_millis(250));
        assert_eq!(config.overall_timeout, Duration::from_secs(5));
        assert_eq!(config.payload_size, 64);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse_args_from(["hoptrace"]).is_err());
        assert!(parse_args_from(["hoptrace", "-m", "0", "example.com"]).is_err());
        assert!(parse_args_from(["hoptrace", "-m", "300", "example.com"]).is_err());
        assert!(parse_args_from(["hoptrace", "-q", "0", "example.com"]).is_err());
    }

    #[test]
    fn test_huge_overall_timeout_fails_validation() {
        let args =
            parse_args_from(["hoptrace", "-W", "18446744073709551615", "example.com"]).unwrap();
        let err = args.to_config().validate().unwrap_err();
        assert_eq!(err.code(), 2100);
    }
}
