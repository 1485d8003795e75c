//! Fixed-interval sweep loop.
//!
//! State machine: `Idle -> Running -> Stopping -> Stopped`, or `Idle -> Stopped`
//! when no hosts are configured. Sweeps are strictly serialized: a sweep that
//! overruns the interval is followed immediately by the next one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, error, field, info, info_span, warn};

use crate::instruments::InstrumentRegistry;
use crate::probes::{ProbeStatus, Prober};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

pub struct Runner<P> {
    prober: P,
    registry: Arc<InstrumentRegistry>,
    configured_hosts: Vec<String>,
    interval: Duration,
    timeout: Duration,
    state_tx: watch::Sender<RunnerState>,
}

impl<P: Prober> Runner<P> {
    pub fn new(
        prober: P,
        registry: Arc<InstrumentRegistry>,
        hosts: Vec<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(RunnerState::Idle);
        Self {
            prober,
            registry,
            configured_hosts: hosts,
            interval,
            timeout: timeout.min(interval),
            state_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<RunnerState> {
        self.state_tx.subscribe()
    }

    /// Sweep until `shutdown` becomes `true` (or its sender is dropped).
    ///
    /// Returns the terminal state. A pending tick wait is interrupted at once;
    /// an in-flight probe is allowed to finish and be recorded.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RunnerState {
        let hosts = load_hosts(&self.configured_hosts);
        info!(
            hosts = ?hosts,
            count = hosts.len(),
            interval_secs = self.interval.as_secs(),
            timeout_ms = self.timeout.as_millis() as u64,
            "Loaded host list"
        );
        if hosts.is_empty() {
            warn!("No hosts configured; probe runner will not start");
            self.transition(RunnerState::Stopped);
            return RunnerState::Stopped;
        }

        self.transition(RunnerState::Running);

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sweep: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tick.tick() => {}
            }

            sweep += 1;
            if !self.sweep(&hosts, sweep, &mut shutdown).await {
                break;
            }
        }

        self.transition(RunnerState::Stopping);
        info!(sweeps = sweep, "Probe runner stopping");
        drop(tick);
        self.transition(RunnerState::Stopped);
        RunnerState::Stopped
    }

    /// Probe every host once, in order. Returns `false` if cancelled part way.
    ///
    /// A shutdown raised mid-probe moves the runner to `Stopping` at once; the
    /// in-flight probe still completes and is recorded.
    async fn sweep(
        &self,
        hosts: &[String],
        number: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let span = info_span!("sweep", sweep = number, hosts = hosts.len());
        async {
            for (i, host) in hosts.iter().enumerate() {
                if is_cancelled(shutdown) {
                    self.transition(RunnerState::Stopping);
                    info!(skipped = hosts.len() - i, "Shutdown requested; skipping remaining hosts");
                    return false;
                }

                let ping = self.probe_host(host);
                tokio::pin!(ping);
                tokio::select! {
                    biased;
                    () = &mut ping => {}
                    () = async { drop(shutdown.wait_for(|stop| *stop).await) } => {
                        self.transition(RunnerState::Stopping);
                        ping.await;
                    }
                }
            }
            true
        }
        .instrument(span)
        .await
    }

    async fn probe_host(&self, host: &str) {
        let span = info_span!(
            "ping",
            host,
            status = field::Empty,
            roundtrip_ms = field::Empty
        );
        let result = self
            .prober
            .probe(host, self.timeout)
            .instrument(span.clone())
            .await;

        span.record("status", result.status.as_str());
        span.in_scope(|| {
            match result.status {
                ProbeStatus::Success => {
                    let latency_ms = result.latency_ms.unwrap_or_default();
                    span.record("roundtrip_ms", latency_ms);
                    info!(host, status = %result.status, latency_ms, "Ping successful");
                }
                ProbeStatus::Failure => {
                    info!(host, status = %result.status, "Ping failed");
                }
                ProbeStatus::Error => {
                    error!(
                        host,
                        status = %result.status,
                        error = result.error_detail.as_deref().unwrap_or("unknown"),
                        "Ping failed with error"
                    );
                }
            }
            self.registry.record(&result);
        });
    }

    /// Publish `state`; repeating the current state is a no-op.
    fn transition(&self, state: RunnerState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(state = ?state, "Runner state changed");
        }
    }
}

fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Trim entries, dropping blanks and repeats while keeping configured order.
fn load_hosts(configured: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::with_capacity(configured.len());

    for entry in configured {
        let host = entry.trim();
        if host.is_empty() {
            warn!("Ignoring blank host entry");
            continue;
        }
        if !seen.insert(host.to_string()) {
            warn!(host, "Ignoring duplicate host entry");
            continue;
        }
        hosts.push(host.to_string());
    }

    hosts
}
