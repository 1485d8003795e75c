//! ICMP echo prober.
//!
//! Opens a short-lived ICMP client per probe, so the socket is released on
//! every exit path (reply, timeout, fault) when the client is dropped.
//!
//! The probe timeout bounds the whole attempt: name resolution, socket setup
//! and the echo exchange share a single deadline.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tokio::time::timeout;
use tracing::debug;

use crate::probes::{ProbeResult, Prober};

/// Echo payload size, matching the usual 32-byte default of desktop ping tools
const PAYLOAD_SIZE: usize = 32;

/// Hostname to address lookup used before each echo.
pub trait Resolve: Send + Sync {
    fn resolve(&self, host: &str) -> impl Future<Output = io::Result<IpAddr>> + Send;
}

/// Resolves through the operating system (`getaddrinfo`). IP literals skip
/// the lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let mut addrs = tokio::net::lookup_host(format!("{host}:0")).await?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses found"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct IcmpProber<R = SystemResolver> {
    resolver: R,
}

impl IcmpProber<SystemResolver> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Resolve> IcmpProber<R> {
    pub fn with_resolver(resolver: R) -> Self {
        Self { resolver }
    }

    async fn attempt(&self, host: &str, probe_timeout: Duration) -> ProbeResult {
        let ip_addr = match self.resolver.resolve(host).await {
            Ok(ip) => ip,
            Err(e) => return ProbeResult::error(host, format!("failed to resolve host: {e}")),
        };

        let config = match ip_addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = match Client::new(&config) {
            Ok(c) => c,
            Err(e) => {
                return ProbeResult::error(host, format!("failed to open ICMP socket: {e}"));
            }
        };

        let mut pinger = client.pinger(ip_addr, PingIdentifier(rand::random())).await;
        pinger.timeout(probe_timeout);

        let payload = [0u8; PAYLOAD_SIZE];
        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_, rtt)) => {
                debug!(host, %ip_addr, rtt_us = rtt.as_micros() as u64, "Echo reply received");
                ProbeResult::success(host, rtt.as_millis() as u64)
            }
            Err(SurgeError::Timeout { .. }) => ProbeResult::failure(host),
            Err(SurgeError::IOError(e)) if is_unreachable(&e) => ProbeResult::failure(host),
            Err(e) => ProbeResult::error(host, e.to_string()),
        }
    }
}

impl<R: Resolve> Prober for IcmpProber<R> {
    async fn probe(&self, host: &str, probe_timeout: Duration) -> ProbeResult {
        match timeout(probe_timeout, self.attempt(host, probe_timeout)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(host, timeout_ms = probe_timeout.as_millis() as u64, "Probe deadline elapsed");
                ProbeResult::failure(host)
            }
        }
    }
}

/// Unreachable replies are an expected network outcome, not a probe fault.
fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProbeStatus;
    use tokio::time::Instant;

    /// A DNS server that never answers.
    struct StalledResolver;

    impl Resolve for StalledResolver {
        async fn resolve(&self, _host: &str) -> io::Result<IpAddr> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_resolve_host_ipv4() {
        let ip = SystemResolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_resolve_host_ipv6() {
        let ip = SystemResolver.resolve("::1").await.unwrap();
        assert_eq!(ip, IpAddr::V6(std::net::Ipv6Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_malformed_host_is_error() {
        let result = IcmpProber::new()
            .probe("not a valid host name!", Duration::from_secs(5))
            .await;

        assert_eq!(result.status, ProbeStatus::Error);
        assert!(result.latency_ms.is_none());
        assert!(result.error_detail.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_resolution_bounded_by_timeout() {
        let prober = IcmpProber::with_resolver(StalledResolver);
        let started = Instant::now();

        let result = prober.probe("slow.example", Duration::from_secs(3)).await;

        assert_eq!(result.status, ProbeStatus::Failure);
        assert_eq!(result.host, "slow.example");
        assert!(result.latency_ms.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_unreachable_is_failure_kind() {
        assert!(is_unreachable(&io::Error::from(io::ErrorKind::HostUnreachable)));
        assert!(!is_unreachable(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
