use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_PROBE_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_EXPORT_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_SERVICE_NAME: &str = "pingward";
const DEFAULT_PROMETHEUS_LISTEN: &str = "127.0.0.1:9464";

/// Environment variable prefix, e.g. `PINGWARD_HOSTS=a.example,b.example`
const ENV_PREFIX: &str = "PINGWARD";

/// Probe cadence configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProbeSettings {
    pub interval_secs: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// OTLP export configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OtlpSettings {
    pub endpoint: Option<String>,
    pub export_interval_secs: Option<u64>,
}

/// Prometheus scrape endpoint, served next to OTLP export when enabled
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PrometheusSettings {
    pub enabled: Option<bool>,
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogSettings {
    /// Print a line for every closed span (sweeps and pings) with its timings
    pub console_spans: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub otlp: OtlpSettings,
    #[serde(default)]
    pub prometheus: PrometheusSettings,
    #[serde(default)]
    pub log: LogSettings,
    pub service_name: Option<String>,
}

impl Settings {
    /// Load settings from `.env`, an optional YAML file and `PINGWARD_*` variables,
    /// later sources overriding earlier ones.
    pub fn new(config_path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let builder = Config::builder().add_source(File::from(config_path).required(false));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let s = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("hosts")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Time between the start of consecutive sweeps.
    pub fn probe_interval(&self) -> Duration {
        let secs = self
            .probe
            .interval_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_PROBE_INTERVAL_SECONDS);
        Duration::from_secs(secs)
    }

    /// Per-probe wait, never longer than the probe interval.
    pub fn probe_timeout(&self) -> Duration {
        let interval = self.probe_interval();
        let timeout = Duration::from_millis(
            self.probe
                .timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
        );

        if timeout > interval {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                interval_secs = interval.as_secs(),
                "Probe timeout exceeds probe interval; clamping to the interval"
            );
            interval
        } else {
            timeout
        }
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(
            self.otlp
                .export_interval_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_EXPORT_INTERVAL_SECONDS),
        )
    }

    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus.enabled.unwrap_or(false)
    }

    /// Scrape endpoint address, or `None` when the Prometheus exporter is off.
    pub fn prometheus_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        if !self.prometheus_enabled() {
            return Ok(None);
        }

        let listen = self
            .prometheus
            .listen
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .unwrap_or(DEFAULT_PROMETHEUS_LISTEN);
        listen
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Message(format!("invalid prometheus.listen {listen:?}: {e}")))
    }

    pub fn console_spans(&self) -> bool {
        self.log.console_spans.unwrap_or(false)
    }

    pub fn service_name(&self) -> &str {
        self.service_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SERVICE_NAME)
    }
}
