use crate::error::{Result, TraceRouteError};
use dns_lookup::{lookup_addr, lookup_host};
use std::net::IpAddr;

/// Turns a hostname into the address to trace. May block.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, hostname: &str) -> Result<IpAddr>;
}

/// Resolves through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str) -> Result<IpAddr> {
        resolve_hostname(hostname)
    }
}

/// Resolve `hostname` to an IPv4 address. IP literals are accepted as-is.
pub fn resolve_hostname(hostname: &str) -> Result<IpAddr> {
    // First try to parse as IP address
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(_) => Ok(ip),
            IpAddr::V6(_) => Err(TraceRouteError::cannot_find_host(
                hostname,
                "IPv6 targets are not supported",
            )),
        };
    }

    let addresses =
        lookup_host(hostname).map_err(|e| TraceRouteError::cannot_find_host(hostname, e))?;
    log::debug!("Resolved {} to {:?}", hostname, addresses);

    addresses
        .into_iter()
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| TraceRouteError::cannot_find_host(hostname, "no IPv4 address found"))
}

pub async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        lookup_addr(&ip).ok()
    }).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_address_parsing() {
        let result = resolve_hostname("8.8.8.8");
        assert_eq!(result.unwrap(), "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_ipv6_literal_rejected() {
        let err = SystemResolver.resolve("2001:db8::1").unwrap_err();
        assert_eq!(err.code(), 2000);
    }

    #[test]
    fn test_unresolvable_host() {
        let err = resolve_hostname("nonexistent.invalid").unwrap_err();
        assert!(matches!(err, TraceRouteError::CannotFindHost { .. }));
    }

    #[test]
    fn test_localhost_resolution() {
        let result = resolve_hostname("localhost");
        // This may or may not succeed depending on resolver configuration
        if let Ok(ip) = result {
            assert!(ip.is_ipv4());
        }
    }

    #[tokio::test]
    async fn test_reverse_lookup() {
        let ip = "127.0.0.1".parse::<IpAddr>().unwrap();
        let result = reverse_lookup(ip).await;
        // This may or may not succeed depending on DNS configuration
        println!("Reverse lookup result: {:?}", result);
    }
}
