//! OpenTelemetry export and log subscriber setup
//!
//! Exports ping metrics and per-probe spans to an OpenTelemetry Collector and,
//! when `prometheus.enabled` is set, exposes the same metrics for scraping.
//!
//! ## OTLP Endpoint Priority
//! 1. `otlp.endpoint` setting (file or `PINGWARD_OTLP__ENDPOINT`)
//! 2. `OTEL_EXPORTER_OTLP_ENDPOINT` environment variable
//! 3. Neither set: export disabled, measurements are dropped by the SDK

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::settings::Settings;

/// Instrumentation scope for meters and tracers
const SCOPE_NAME: &str = "pingward";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owned meter/tracer providers. Dropping without [`Telemetry::shutdown`]
/// may lose the last export batch.
pub struct Telemetry {
    meter_provider: SdkMeterProvider,
    tracer_provider: Option<TracerProvider>,
    prometheus_registry: Option<prometheus::Registry>,
    endpoint: Option<String>,
}

impl Telemetry {
    /// Build the metric and span pipelines.
    ///
    /// Must be called from within a Tokio runtime when an endpoint is configured.
    pub fn init(settings: &Settings) -> Result<Self> {
        let endpoint = resolve_otlp_endpoint(settings.otlp.endpoint.as_deref());

        let resource = Resource::default().merge(&Resource::new(vec![
            KeyValue::new("service.name", settings.service_name().to_string()),
            KeyValue::new("telemetry.sdk.language", "rust"),
        ]));

        let mut meter_builder = SdkMeterProvider::builder().with_resource(resource.clone());
        let mut tracer_provider = None;
        let mut prometheus_registry = None;

        if settings.prometheus_enabled() {
            let registry = prometheus::Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .context("Failed to create Prometheus exporter")?;
            meter_builder = meter_builder.with_reader(exporter);
            prometheus_registry = Some(registry);
        }

        if let Some(endpoint) = &endpoint {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .with_timeout(EXPORT_TIMEOUT)
                .build()
                .context("Failed to create OTLP metric exporter")?;

            let reader = PeriodicReader::builder(exporter, runtime::Tokio)
                .with_interval(settings.export_interval())
                .build();
            meter_builder = meter_builder.with_reader(reader);

            let span_exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .with_timeout(EXPORT_TIMEOUT)
                .build()
                .context("Failed to create OTLP span exporter")?;

            tracer_provider = Some(
                TracerProvider::builder()
                    .with_batch_exporter(span_exporter, runtime::Tokio)
                    .with_resource(resource)
                    .build(),
            );
        }

        Ok(Self {
            meter_provider: meter_builder.build(),
            tracer_provider,
            prometheus_registry,
            endpoint,
        })
    }

    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(SCOPE_NAME)
    }

    pub fn tracer(&self) -> Option<Tracer> {
        self.tracer_provider
            .as_ref()
            .map(|provider| provider.tracer(SCOPE_NAME))
    }

    /// Registry backing the scrape endpoint, if the Prometheus exporter is on.
    pub fn prometheus_registry(&self) -> Option<&prometheus::Registry> {
        self.prometheus_registry.as_ref()
    }

    pub fn log_status(&self) {
        match &self.endpoint {
            Some(endpoint) => info!(endpoint = %endpoint, "OpenTelemetry export enabled"),
            None => info!("No OTLP endpoint configured. Telemetry export disabled."),
        }
    }

    /// Flush pending metrics and spans and shut the providers down.
    pub fn shutdown(self) {
        info!("Shutting down OpenTelemetry providers...");
        if let Err(e) = self.meter_provider.shutdown() {
            warn!("Failed to shutdown MeterProvider: {}", e);
        }
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                warn!("Failed to shutdown TracerProvider: {}", e);
            }
        }
        info!("OpenTelemetry shutdown complete");
    }
}

/// Install the global `tracing` subscriber: formatted logs plus, when a tracer
/// is given, span export.
///
/// `RUST_LOG` takes precedence over the `verbose` default. With `console_spans`
/// every closed sweep/ping span is also printed with its busy and idle time.
pub fn init_logging(verbose: bool, console_spans: bool, tracer: Option<Tracer>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_span_events(span_events(console_spans)))
        .with(otel_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

fn span_events(console_spans: bool) -> FmtSpan {
    if console_spans { FmtSpan::CLOSE } else { FmtSpan::NONE }
}

fn resolve_otlp_endpoint(configured: Option<&str>) -> Option<String> {
    let endpoint = match configured {
        Some(ep) if !ep.is_empty() => ep.to_string(),
        _ => std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?,
    };
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint)
    }
}
