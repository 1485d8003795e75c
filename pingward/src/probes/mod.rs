use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub mod icmp;

pub use icmp::{IcmpProber, Resolve, SystemResolver};

/// Classification of a single probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStatus {
    /// Reply received within the timeout
    Success,
    /// Timed out or reported unreachable without a system-level fault
    Failure,
    /// The probe itself faulted (resolution, permissions, socket I/O)
    Error,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Failure => "failure",
            ProbeStatus::Error => "error",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one ping attempt against one host.
///
/// `latency_ms` is only set for [`ProbeStatus::Success`] and `error_detail`
/// only for [`ProbeStatus::Error`]; the constructors enforce this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: String,
    pub status: ProbeStatus,
    pub latency_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub error_detail: Option<String>,
}

impl ProbeResult {
    pub fn success(host: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            host: host.into(),
            status: ProbeStatus::Success,
            latency_ms: Some(latency_ms),
            timestamp: Utc::now(),
            error_detail: None,
        }
    }

    pub fn failure(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: ProbeStatus::Failure,
            latency_ms: None,
            timestamp: Utc::now(),
            error_detail: None,
        }
    }

    pub fn error(host: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: ProbeStatus::Error,
            latency_ms: None,
            timestamp: Utc::now(),
            error_detail: Some(detail.into()),
        }
    }
}

/// A single bounded reachability check.
///
/// Implementations must convert every outcome, including internal faults,
/// into a [`ProbeResult`] and must not touch shared recording state.
pub trait Prober: Send + Sync {
    fn probe(&self, host: &str, timeout: Duration) -> impl Future<Output = ProbeResult> + Send;
}
