use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use console::style;
use core_types::config::load_config;
use ipc::{ControlResponse, StatusResponse};
use std::path::PathBuf;

#[cfg(unix)]
use ipc::client::SocketClient;

/// Operator CLI for the Autocapture daemon.
#[derive(Parser, Debug)]
#[command(
    name = "autocapture",
    version,
    about = "Autocapture operator/diagnostic client"
)]
struct Cli {
    /// Control socket path (defaults to the configured one).
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Current mode, remaining budget, queue depths, and counters.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Force one heavy drain tick (raises query intent for one decision).
    ForceTick {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Toggle safe mode at runtime.
    SafeMode {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
    /// Clear a latched invariant breach.
    Reset,
    /// Dump prometheus metrics.
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let socket = match &cli.socket {
        Some(path) => path.clone(),
        None => load_config(cli.config.as_deref())?.control.socket_path,
    };

    #[cfg(not(unix))]
    {
        let _ = socket;
        bail!("the control socket client is only available on unix hosts");
    }

    #[cfg(unix)]
    {
        let client = SocketClient::new(socket);
        match cli.command {
            Commands::Status { json } => {
                let response = client.status().await?;
                match response {
                    ControlResponse::Status(status) if json => {
                        println!("{}", serde_json::to_string_pretty(&status)?);
                    }
                    ControlResponse::Status(status) => print_status(&status),
                    other => bail_unexpected(other)?,
                }
            }
            Commands::ForceTick { json } => {
                let response = client.force_tick().await?;
                match response {
                    ControlResponse::Tick(tick) if json => {
                        println!("{}", serde_json::to_string_pretty(&tick)?);
                    }
                    ControlResponse::Tick(tick) => {
                        println!(
                            "{} mode={} reason={} heavy_allowed={} budget_remaining_ms={}",
                            style("forced tick:").cyan(),
                            style(&tick.mode).bold(),
                            tick.reason,
                            tick.heavy_allowed,
                            tick.budget_remaining_ms
                        );
                    }
                    other => bail_unexpected(other)?,
                }
            }
            Commands::SafeMode { state } => {
                let enabled = state == "on";
                match client.set_safe_mode(enabled).await? {
                    ControlResponse::SafeMode(ack) => {
                        println!(
                            "safe mode {}",
                            if ack.enabled {
                                style("enabled").red().to_string()
                            } else {
                                style("disabled").green().to_string()
                            }
                        );
                    }
                    other => bail_unexpected(other)?,
                }
            }
            Commands::Reset => match client.reset().await? {
                ControlResponse::Reset { .. } => println!("governor latch cleared"),
                other => bail_unexpected(other)?,
            },
            Commands::Metrics => match client.metrics().await? {
                ControlResponse::Metrics(metrics) => print!("{}", metrics.text),
                other => bail_unexpected(other)?,
            },
        }
        Ok(())
    }
}

fn bail_unexpected(response: ControlResponse) -> Result<()> {
    match response {
        ControlResponse::Error { message, .. } => bail!("daemon error: {message}"),
        other => bail!("unexpected response: {other:?}"),
    }
}

fn print_status(status: &StatusResponse) {
    let mode = match status.mode.as_str() {
        "idle_drain" | "user_query" => style(&status.mode).green(),
        "safe_mode" => style(&status.mode).red(),
        _ => style(&status.mode).yellow(),
    };
    println!("{} {}", style("mode:").bold(), mode);
    println!("{} {}", style("reason:").bold(), status.reason);
    println!("{} {}", style("heavy allowed:").bold(), status.heavy_allowed);
    println!(
        "{} {} ms",
        style("budget remaining:").bold(),
        status.budget_remaining_ms
    );
    println!(
        "{} {} heavy / {} light queued, {} running, {} cooling down",
        style("jobs:").bold(),
        status.queued_heavy,
        status.queued_light,
        status.running,
        status.cooling_down
    );
    if status.safe_mode_latched {
        println!(
            "{}",
            style("safe mode latched; run `autocapture reset` after investigating").red()
        );
    }
    let c = &status.counters;
    println!(
        "{} {} decisions, {} granted / {} denied / {} reclaimed leases",
        style("governor:").bold(),
        c.decisions,
        c.leases_granted,
        c.leases_denied,
        c.leases_reclaimed
    );
    println!(
        "{} {} admitted, {} deferred, {} preempted, {} completed, {} failed, {} rogue, {} dead-lettered",
        style("scheduler:").bold(),
        c.admitted,
        c.deferred,
        c.preempted,
        c.completed,
        c.failed,
        c.rogue,
        c.dead_lettered
    );
}
