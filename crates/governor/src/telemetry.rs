//! Decision telemetry: one structured record per conductor tick, pushed
//! through an injected sink. The sink implementation (log line,
//! prometheus registry) lives with the host process.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decision::{Decision, Mode, Reason};

/// Snapshot published at each decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub mode: Mode,
    pub reason: Reason,
    pub heavy_allowed: bool,
    pub budget_remaining_ms: u64,
    /// Jobs started since the last record.
    pub admitted: u64,
    /// Heavy jobs pushed back on lease denial since the last record.
    pub deferred: u64,
    /// Jobs asked to yield since the last record.
    pub preempted: u64,
}

impl DecisionRecord {
    pub fn from_decision(decision: &Decision, admitted: u64, deferred: u64, preempted: u64) -> Self {
        Self {
            mode: decision.mode,
            reason: decision.reason,
            heavy_allowed: decision.heavy_allowed,
            budget_remaining_ms: decision.budget_remaining_ms,
            admitted,
            deferred,
            preempted,
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &DecisionRecord);
}

/// Sink that emits each record as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, record: &DecisionRecord) {
        info!(
            mode = record.mode.as_str(),
            reason = record.reason.as_str(),
            heavy_allowed = record.heavy_allowed,
            budget_remaining_ms = record.budget_remaining_ms,
            admitted = record.admitted,
            deferred = record.deferred,
            preempted = record.preempted,
            "governor decision"
        );
    }
}

/// Sink that drops everything; placeholder for embedders that poll
/// status instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _record: &DecisionRecord) {}
}

/// Read-only governor state for the operator surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub mode: Mode,
    pub reason: Reason,
    pub heavy_allowed: bool,
    pub budget_remaining_ms: u64,
    pub outstanding_leases: usize,
    pub safe_mode_latched: bool,
    pub decisions: u64,
    pub leases_granted: u64,
    pub leases_denied: u64,
    pub leases_reclaimed: u64,
}
