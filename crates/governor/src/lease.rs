use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{Mode, Reason};

/// Opaque lease token; the only valid correlation key for
/// `should_preempt` and `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub(crate) fn allocate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A time-bounded permission to run one heavy job. Never persisted;
/// released on completion or preemption, reclaimed by the sweep
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub allowed: bool,
    /// Grant ceiling in milliseconds; 0 when denied.
    pub granted_ms: u64,
    /// Mode at issuance.
    pub mode: Mode,
    /// Why the lease was allowed or denied.
    pub reason: Reason,
    /// Present exactly when `allowed`.
    pub lease_id: Option<LeaseId>,
}

impl Lease {
    pub(crate) fn denied(mode: Mode, reason: Reason) -> Self {
        Self {
            allowed: false,
            granted_ms: 0,
            mode,
            reason,
            lease_id: None,
        }
    }

    pub(crate) fn granted(id: LeaseId, granted_ms: u64, mode: Mode, reason: Reason) -> Self {
        Self {
            allowed: true,
            granted_ms,
            mode,
            reason,
            lease_id: Some(id),
        }
    }
}

/// Governor-side record of a live lease.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutstandingLease {
    pub granted_ms: u64,
    pub issued_at: Instant,
    pub require_gpu: bool,
}
