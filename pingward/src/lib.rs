pub mod instruments;
pub mod metrics_server;
pub mod probes;
pub mod runner;
pub mod settings;
pub mod telemetry;

#[cfg(test)]
mod testing;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use crate::instruments::InstrumentRegistry;
use crate::probes::{IcmpProber, Prober};
use crate::runner::Runner;
use crate::settings::Settings;
use crate::telemetry::Telemetry;

pub struct PingWardEngine {
    pub settings: Settings,
    telemetry: Telemetry,
}

impl PingWardEngine {
    pub fn new(settings: Settings, telemetry: Telemetry) -> Self {
        Self {
            settings,
            telemetry,
        }
    }

    /// Probe until Ctrl-C/SIGTERM, or until the runner stops on its own
    /// (no hosts configured), then flush telemetry.
    pub async fn run(self) -> Result<()> {
        self.run_until(IcmpProber::new(), shutdown_signal()).await
    }

    /// Run until `signal` resolves. A failed signal still stops the runner
    /// and flushes telemetry before its error is returned.
    async fn run_until<P>(self, prober: P, signal: impl Future<Output = Result<()>>) -> Result<()>
    where
        P: Prober + 'static,
    {
        self.telemetry.log_status();
        let metrics_addr = self.settings.prometheus_addr()?;

        let registry = Arc::new(InstrumentRegistry::new(Arc::new(self.telemetry.meter())));
        let runner = Runner::new(
            prober,
            registry,
            self.settings.hosts.clone(),
            self.settings.probe_interval(),
            self.settings.probe_timeout(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let metrics_server = match (metrics_addr, self.telemetry.prometheus_registry()) {
            (Some(addr), Some(prometheus)) => {
                let server = metrics_server::serve(addr, prometheus.clone(), shutdown_rx.clone());
                Some(tokio::spawn(async move {
                    if let Err(e) = server.await {
                        error!("Prometheus metrics server failed: {:#}", e);
                    }
                }))
            }
            _ => None,
        };

        let mut handle = tokio::spawn(runner.run(shutdown_rx));

        info!("Monitoring active. Press Ctrl-C to exit.");
        let (joined, signal) = tokio::select! {
            joined = &mut handle => (joined, Ok(())),
            signal = signal => {
                match &signal {
                    Ok(()) => info!("Exiting..."),
                    Err(e) => error!("Shutdown signal listener failed, stopping: {:#}", e),
                }
                shutdown_tx.send_replace(true);
                (handle.await, signal)
            }
        };

        shutdown_tx.send_replace(true);
        if let Some(server) = metrics_server {
            if let Err(e) = server.await {
                error!("Prometheus metrics server task failed: {}", e);
            }
        }
        self.telemetry.shutdown();

        let state = joined.context("Probe runner task failed")?;
        info!(state = ?state, "Probe runner finished");
        signal
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
