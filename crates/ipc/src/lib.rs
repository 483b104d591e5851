//! Control protocol models for Autocapture.
//!
//! These types are serialized as newline-delimited JSON over the
//! daemon's Unix control socket (framing handled in the service and
//! CLI). The goal here is to model the operator surface without pulling
//! in governor or scheduler dependencies.

#[cfg(unix)]
pub mod client;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One operator request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Current mode, budget, queue depths, and counters.
    Status { id: Uuid },
    /// One forced conductor tick with `query_intent=true`.
    ForceTick { id: Uuid },
    /// Runtime safe-mode toggle.
    SetSafeMode { id: Uuid, enabled: bool },
    /// Clear a latched invariant breach.
    Reset { id: Uuid },
    /// Prometheus text exposition.
    Metrics { id: Uuid },
}

impl ControlRequest {
    pub fn id(&self) -> Uuid {
        match self {
            ControlRequest::Status { id }
            | ControlRequest::ForceTick { id }
            | ControlRequest::SetSafeMode { id, .. }
            | ControlRequest::Reset { id }
            | ControlRequest::Metrics { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Status(StatusResponse),
    Tick(TickResponse),
    SafeMode(SafeModeResponse),
    Reset { id: Uuid },
    Metrics(MetricsResponse),
    Error { id: Uuid, message: String },
}

/// Cumulative governor and scheduler counters since boot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub decisions: u64,
    pub leases_granted: u64,
    pub leases_denied: u64,
    pub leases_reclaimed: u64,
    pub admitted: u64,
    pub deferred: u64,
    pub preempted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rogue: u64,
    pub dead_lettered: u64,
}

/// When heavy work is not happening, `reason` says exactly why; that
/// tag is the operator contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub mode: String,
    pub reason: String,
    pub heavy_allowed: bool,
    pub budget_remaining_ms: u64,
    pub outstanding_leases: usize,
    pub safe_mode_latched: bool,
    pub queued_heavy: usize,
    pub queued_light: usize,
    pub running: usize,
    pub cooling_down: usize,
    pub counters: CounterSnapshot,
}

/// Decision produced by a forced tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResponse {
    pub id: Uuid,
    pub mode: String,
    pub reason: String,
    pub heavy_allowed: bool,
    pub budget_remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeModeResponse {
    pub id: Uuid,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub id: Uuid,
    /// Prometheus text exposition format.
    pub text: String,
}
