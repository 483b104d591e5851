use serde::{Deserialize, Serialize};

/// The current scheduling regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// User is interacting; capture continues, heavy work does not.
    ActiveCaptureOnly,
    /// Sustained idle; background drain may proceed.
    IdleDrain,
    /// An operator raised query intent; heavy work is authoritative.
    UserQuery,
    /// Forced by configuration or a latched invariant breach.
    SafeMode,
}

impl Mode {
    /// Membership in the heavy-allowing set. Every admission and
    /// preemption check must go through this predicate, never through
    /// equality against a single variant.
    pub fn allows_heavy(self) -> bool {
        matches!(self, Mode::IdleDrain | Mode::UserQuery)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::ActiveCaptureOnly => "active_capture_only",
            Mode::IdleDrain => "idle_drain",
            Mode::UserQuery => "user_query",
            Mode::SafeMode => "safe_mode",
        }
    }
}

/// Why the governor landed on its mode / heavy verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    UserActive,
    IdleWindow,
    ForcedQuery,
    BudgetExhausted,
    JobsExhausted,
    SafeMode,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::UserActive => "user_active",
            Reason::IdleWindow => "idle_window",
            Reason::ForcedQuery => "forced_query",
            Reason::BudgetExhausted => "budget_exhausted",
            Reason::JobsExhausted => "jobs_exhausted",
            Reason::SafeMode => "safe_mode",
        }
    }
}

/// Outcome of one `decide` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub mode: Mode,
    pub heavy_allowed: bool,
    pub reason: Reason,
    pub budget_remaining_ms: u64,
}
