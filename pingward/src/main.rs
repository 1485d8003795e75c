use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pingward::PingWardEngine;
use pingward::settings::Settings;
use pingward::telemetry::{self, Telemetry};

#[derive(Debug, Parser)]
#[clap(about = "Periodically pings configured hosts and exports the results as OpenTelemetry metrics")]
struct Opt {
    /// Verbose output
    #[clap(short, long)]
    verbose: bool,

    /// Settings file (YAML); missing file is not an error
    #[clap(short, long, env = "PINGWARD_CONFIG", default_value = "pingward.yaml")]
    config: PathBuf,

    /// Host to probe; repeat for several. Replaces the configured host list.
    #[clap(long = "host")]
    hosts: Vec<String>,

    /// Print every sweep and ping span with its timings when it closes
    #[clap(long)]
    console_spans: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    let mut settings = Settings::new(&opt.config).context("Failed to load settings")?;
    if !opt.hosts.is_empty() {
        settings.hosts = opt.hosts;
    }

    let telemetry = Telemetry::init(&settings)?;
    let console_spans = opt.console_spans || settings.console_spans();
    telemetry::init_logging(opt.verbose, console_spans, telemetry.tracer())?;

    PingWardEngine::new(settings, telemetry).run().await
}
