//! vcstat - VMware vCenter status collector
//!
//! This is the main entry point for the vcstat CLI. Records go to stdout,
//! logs to stderr.

mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, LogFormat, OutputFormat};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcstat::config::Config;
use vcstat::context::CycleContext;
use vcstat::gather::{GatherReport, Gatherer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.sample_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    init_logging(cli.verbose, cli.log_format);

    let mut config = Config::load(cli.config.as_ref())?;
    if let Some(interval) = cli.poll_interval {
        config.interval = interval;
    }
    config.validate().context("invalid configuration")?;

    let connector = Arc::new(config.rest_connector()?);
    let mut gatherer = config
        .gatherer(connector)
        .context("invalid configuration")?;
    info!(
        vcenter = %config.vcenter_host(),
        interval = ?config.interval,
        version = vcstat::version(),
        "starting vcstat"
    );

    let result = run(&mut gatherer, cli.format, cli.once).await;
    gatherer.close().await;
    result
}

/// Gather every interval until Ctrl-C, or once. A failed single cycle is
/// the process's failure.
async fn run(gatherer: &mut Gatherer, format: OutputFormat, once: bool) -> Result<()> {
    let shutdown = CycleContext::unbounded();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            signal.cancel();
        }
    });

    let mut ticker = tokio::time::interval(gatherer.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ctx = shutdown.with_timeout(gatherer.interval());
        match gatherer.gather_with(&ctx).await {
            Ok(report) => emit(&report, format)?,
            Err(e) if e.is_cancelled() => break,
            Err(e) if once => return Err(anyhow::Error::new(e).context("gather cycle failed")),
            Err(e) => error!(error = %e, "gather cycle failed"),
        }

        if once {
            break;
        }
    }
    Ok(())
}

/// Write the records of a cycle to stdout.
fn emit(report: &GatherReport, format: OutputFormat) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for metric in &report.metrics {
        match format {
            OutputFormat::Influx => writeln!(out, "{}", metric.to_line_protocol())?,
            OutputFormat::Json => writeln!(out, "{}", metric.to_json()?)?,
        }
    }
    out.flush()?;
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity >= 3),
            )
            .with(env_filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init(),
    }
}
