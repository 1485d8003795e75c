//! Per-host metric instruments.
//!
//! The registry memoizes one [`HostInstrumentSet`] per host and records every
//! [`ProbeResult`] against it, plus process-wide success/failure counters.
//!
//! Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use tracing::warn;

use crate::probes::{ProbeResult, ProbeStatus};

pub const SUCCESS_COUNT: &str = "ping_success_count";
pub const FAILURE_COUNT: &str = "ping_failure_count";
pub const HOST_SUCCESS: &str = "ping_host_success";
pub const HOST_FAILURE: &str = "ping_host_failure";
pub const ROUNDTRIP_TIME: &str = "ping_roundtrip_time";

pub trait CounterInstrument: Send + Sync {
    fn add(&self, value: u64, attributes: &[KeyValue]);
}

pub trait HistogramInstrument: Send + Sync {
    fn record(&self, value: u64, attributes: &[KeyValue]);
}

/// Source of recording handles; the OpenTelemetry [`Meter`] in production.
pub trait InstrumentFactory: Send + Sync {
    fn counter(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Box<dyn CounterInstrument>;

    fn histogram(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Box<dyn HistogramInstrument>;
}

impl CounterInstrument for Counter<u64> {
    fn add(&self, value: u64, attributes: &[KeyValue]) {
        Counter::add(self, value, attributes);
    }
}

impl HistogramInstrument for Histogram<u64> {
    fn record(&self, value: u64, attributes: &[KeyValue]) {
        Histogram::record(self, value, attributes);
    }
}

impl InstrumentFactory for Meter {
    fn counter(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Box<dyn CounterInstrument> {
        Box::new(
            self.u64_counter(name)
                .with_description(description)
                .with_unit(unit)
                .build(),
        )
    }

    fn histogram(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Box<dyn HistogramInstrument> {
        Box::new(
            self.u64_histogram(name)
                .with_description(description)
                .with_unit(unit)
                .build(),
        )
    }
}

/// Recording handles for a single host
pub struct HostInstrumentSet {
    host: String,
    success: Box<dyn CounterInstrument>,
    failure: Box<dyn CounterInstrument>,
    roundtrip_ms: Box<dyn HistogramInstrument>,
}

impl HostInstrumentSet {
    fn new(factory: &dyn InstrumentFactory, host: &str) -> Self {
        Self {
            host: host.to_string(),
            success: factory.counter(HOST_SUCCESS, "Successful pings per host", "pings"),
            failure: factory.counter(HOST_FAILURE, "Failed pings per host", "pings"),
            roundtrip_ms: factory.histogram(ROUNDTRIP_TIME, "Ping round-trip time", "ms"),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn record(&self, result: &ProbeResult) {
        let host = KeyValue::new("host", self.host.clone());
        match (result.status, result.latency_ms) {
            (ProbeStatus::Success, latency) => {
                let attrs = [host];
                self.success.add(1, &attrs);
                if let Some(ms) = latency {
                    self.roundtrip_ms.record(ms, &attrs);
                }
            }
            (status, _) => {
                let attrs = [host, KeyValue::new("status", status.as_str())];
                self.failure.add(1, &attrs);
            }
        }
    }
}

/// Lazily-populated host → instrument set map.
pub struct InstrumentRegistry {
    factory: Arc<dyn InstrumentFactory>,
    hosts: Mutex<HashMap<String, Arc<HostInstrumentSet>>>,
    success_count: Box<dyn CounterInstrument>,
    failure_count: Box<dyn CounterInstrument>,
}

impl InstrumentRegistry {
    pub fn new(factory: Arc<dyn InstrumentFactory>) -> Self {
        let success_count = factory.counter(SUCCESS_COUNT, "Successful pings, all hosts", "pings");
        let failure_count = factory.counter(FAILURE_COUNT, "Failed pings, all hosts", "pings");
        Self {
            factory,
            hosts: Mutex::new(HashMap::new()),
            success_count,
            failure_count,
        }
    }

    /// Record one probe outcome.
    ///
    /// Results with an empty host are rejected: they are logged and dropped
    /// without creating any instruments.
    pub fn record(&self, result: &ProbeResult) {
        if result.host.is_empty() {
            warn!(status = %result.status, "Dropping probe result without a host");
            return;
        }

        self.instruments_for(&result.host).record(result);

        match result.status {
            ProbeStatus::Success => self.success_count.add(1, &[]),
            ProbeStatus::Failure | ProbeStatus::Error => self.failure_count.add(1, &[]),
        }
    }

    /// Number of hosts with an instrument set.
    pub fn host_count(&self) -> usize {
        self.hosts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn instruments_for(&self, host: &str) -> Arc<HostInstrumentSet> {
        // Creation happens under the lock, so concurrent first sightings of a host
        // still produce a single set.
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostInstrumentSet::new(self.factory.as_ref(), host)))
            .clone()
    }
}
