//! Entry point for the Autocapture daemon: wires the signal reader,
//! governor, scheduler, and conductor, then drives ticks until shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use core_types::config::load_config;
use dotenvy::dotenv;
use governor::{Governor, LogSink, TelemetrySink};
use scheduler::{Conductor, Scheduler, SchedulerConfig};
use signals::SignalReader;
use tracing::{info, warn};

use service::{logging, FanoutSink, ServiceMetrics};

#[derive(Debug, Parser)]
#[command(name = "autocapture-service", version, about = "Autocapture daemon")]
struct Args {
    /// Path to the TOML config file (defaults to AUTOCAPTURE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();
    let cfg = load_config(args.config.as_deref())?;
    let _guard = logging::init(&cfg.logging, &cfg.app.data_dir)?;

    let governor = Arc::new(Governor::from_section(&cfg.governor).context("governor config")?);
    let scheduler_config =
        SchedulerConfig::from_section(&cfg.scheduler).context("scheduler config")?;
    let scheduler = Arc::new(Scheduler::new(governor.clone(), scheduler_config));
    scheduler.set_dead_letter(Arc::new(|letter| {
        warn!(
            job = %letter.name,
            attempts = letter.attempts,
            error = %letter.error,
            "job dead-lettered"
        );
    }));

    let metrics = Arc::new(ServiceMetrics::new()?);
    let sink: Arc<dyn TelemetrySink> = Arc::new(FanoutSink::new(vec![
        Arc::new(LogSink) as Arc<dyn TelemetrySink>,
        metrics.clone() as Arc<dyn TelemetrySink>,
    ]));

    let reader = SignalReader::from_section(&cfg.signals);
    let conductor = Arc::new(Conductor::new(
        reader,
        governor.clone(),
        scheduler.clone(),
        sink,
    ));

    #[cfg(unix)]
    {
        let socket = cfg.control.socket_path.clone();
        let conductor = conductor.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(err) = service::control::run_control_server(socket, conductor, metrics).await
            {
                warn!(error = %err, "control server exited");
            }
        });
    }

    info!(
        tick_ms = cfg.scheduler.tick_ms,
        signals = %cfg.signals.path.display(),
        "autocapture daemon started"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.scheduler.tick_ms.max(50)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let conductor = conductor.clone();
                // run_pending can wait out a suspend deadline; keep the
                // async workers free.
                if let Err(err) = tokio::task::spawn_blocking(move || conductor.tick()).await {
                    warn!(error = %err, "tick task failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
