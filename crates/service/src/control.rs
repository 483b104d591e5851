//! Unix control-socket server: connection-per-request,
//! newline-delimited JSON, types from the `ipc` crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use ipc::{
    ControlRequest, ControlResponse, CounterSnapshot, MetricsResponse, SafeModeResponse,
    StatusResponse, TickResponse,
};
use scheduler::Conductor;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::metrics::{scrape_metrics, ServiceMetrics};

/// Run the control server. Removes a stale socket left by a dead
/// daemon, refuses to start when a live one is listening.
pub async fn run_control_server(
    socket_path: PathBuf,
    conductor: Arc<Conductor>,
    metrics: Arc<ServiceMetrics>,
) -> Result<()> {
    let socket_dir = socket_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;
    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if socket_path.exists() {
        if UnixStream::connect(&socket_path).await.is_err() {
            std::fs::remove_file(&socket_path)?;
            tracing::info!(path = %socket_path.display(), "removed stale control socket");
        } else {
            anyhow::bail!(
                "another daemon is already listening at {}",
                socket_path.display()
            );
        }
    }

    let listener = UnixListener::bind(&socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(path = %socket_path.display(), "control server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let conductor = Arc::clone(&conductor);
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, conductor, metrics).await {
                tracing::debug!(error = %err, "control connection error");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    conductor: Arc<Conductor>,
    metrics: Arc<ServiceMetrics>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
        Ok(request) => dispatch(request, conductor, metrics).await,
        Err(err) => ControlResponse::Error {
            id: Uuid::nil(),
            message: format!("malformed request: {err}"),
        },
    };

    let mut body = serde_json::to_string(&response)?;
    body.push('\n');
    writer.write_all(body.as_bytes()).await?;
    Ok(())
}

async fn dispatch(
    request: ControlRequest,
    conductor: Arc<Conductor>,
    metrics: Arc<ServiceMetrics>,
) -> ControlResponse {
    match request {
        ControlRequest::Status { id } => ControlResponse::Status(build_status(id, &conductor)),
        ControlRequest::ForceTick { id } => {
            // run_once may wait out a suspend deadline; keep it off the
            // async workers.
            let forced = Arc::clone(&conductor);
            match tokio::task::spawn_blocking(move || forced.run_once(true)).await {
                Ok(decision) => ControlResponse::Tick(TickResponse {
                    id,
                    mode: decision.mode.as_str().to_string(),
                    reason: decision.reason.as_str().to_string(),
                    heavy_allowed: decision.heavy_allowed,
                    budget_remaining_ms: decision.budget_remaining_ms,
                }),
                Err(err) => ControlResponse::Error {
                    id,
                    message: format!("forced tick failed: {err}"),
                },
            }
        }
        ControlRequest::SetSafeMode { id, enabled } => {
            conductor.governor().set_safe_mode(enabled);
            tracing::info!(enabled, "safe mode toggled by operator");
            ControlResponse::SafeMode(SafeModeResponse { id, enabled })
        }
        ControlRequest::Reset { id } => {
            conductor.governor().reset();
            tracing::info!("governor latch reset by operator");
            ControlResponse::Reset { id }
        }
        ControlRequest::Metrics { id } => match scrape_metrics(&metrics) {
            Ok(text) => ControlResponse::Metrics(MetricsResponse { id, text }),
            Err(err) => ControlResponse::Error {
                id,
                message: format!("metrics scrape failed: {err}"),
            },
        },
    }
}

fn build_status(id: Uuid, conductor: &Conductor) -> StatusResponse {
    let governor = conductor.governor().status();
    let scheduler = conductor.scheduler().status();
    StatusResponse {
        id,
        mode: governor.mode.as_str().to_string(),
        reason: governor.reason.as_str().to_string(),
        heavy_allowed: governor.heavy_allowed,
        budget_remaining_ms: governor.budget_remaining_ms,
        outstanding_leases: governor.outstanding_leases,
        safe_mode_latched: governor.safe_mode_latched,
        queued_heavy: scheduler.queued_heavy,
        queued_light: scheduler.queued_light,
        running: scheduler.running,
        cooling_down: scheduler.cooling_down,
        counters: CounterSnapshot {
            decisions: governor.decisions,
            leases_granted: governor.leases_granted,
            leases_denied: governor.leases_denied,
            leases_reclaimed: governor.leases_reclaimed,
            admitted: scheduler.totals.admitted,
            deferred: scheduler.totals.deferred,
            preempted: scheduler.totals.preempted,
            completed: scheduler.totals.completed,
            failed: scheduler.totals.failed,
            rogue: scheduler.totals.rogue,
            dead_lettered: scheduler.totals.dead_lettered,
        },
    }
}
