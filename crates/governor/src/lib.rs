//! Runtime governor: decides from activity signals whether heavy
//! background work may run, issues time-bounded leases against a rolling
//! budget, and answers preemption queries. The scheduler crate drives
//! execution; this crate keeps the decision logic self-contained and
//! testable.
//!
//! All state lives in one small record behind one mutex: every public
//! operation reads and writes mode and budget together, so fine-grained
//! locking would buy nothing.

pub mod clock;
pub mod telemetry;

mod budget;
mod config;
mod decision;
mod lease;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GovernorConfig};
pub use decision::{Decision, Mode, Reason};
pub use lease::{Lease, LeaseId};
pub use telemetry::{DecisionRecord, GovernorStatus, LogSink, NullSink, TelemetrySink};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::config::GovernorSection;
use parking_lot::Mutex;
use signals::Signals;
use tracing::{debug, error, warn};

use budget::BudgetWindow;
use lease::OutstandingLease;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    decisions: u64,
    leases_granted: u64,
    leases_denied: u64,
    leases_reclaimed: u64,
}

struct GovernorState {
    config: GovernorConfig,
    mode: Mode,
    mode_changed_at: Instant,
    last_signals: Signals,
    last_seq: HashMap<String, u64>,
    /// Pending plus running heavy jobs, as last reported by the
    /// scheduler. Feeds the `jobs_exhausted` verdict.
    heavy_backlog: usize,
    budget: BudgetWindow,
    leases: HashMap<LeaseId, OutstandingLease>,
    last_decision: Decision,
    latched_safe: bool,
    counters: Counters,
}

impl GovernorState {
    /// Milliseconds the outstanding leases have actually been running,
    /// capped at each grant. This is what decisions and preemption see:
    /// a freshly granted lease has consumed nothing yet, and exhaustion
    /// arrives exactly when the running job uses up its grant.
    fn accrued_ms(&self, now: Instant) -> u64 {
        self.leases
            .values()
            .map(|lease| {
                let elapsed =
                    now.saturating_duration_since(lease.issued_at).as_millis() as u64;
                elapsed.min(lease.granted_ms)
            })
            .sum()
    }

    /// Full reservations of the outstanding leases. Admission uses this
    /// so overlapping grants cannot oversubscribe the window.
    fn reserved_ms(&self) -> u64 {
        self.leases.values().map(|lease| lease.granted_ms).sum()
    }

    /// Store incoming signals unless they regress behind the last seq
    /// seen from the same source. Equal seq re-applies harmlessly.
    fn observe(&mut self, incoming: &Signals) {
        if let Some(&prev) = self.last_seq.get(&incoming.source) {
            if incoming.seq < prev {
                debug!(
                    source = %incoming.source,
                    seq = incoming.seq,
                    last = prev,
                    "ignoring regressed signal"
                );
                return;
            }
        }
        self.last_seq
            .insert(incoming.source.clone(), incoming.seq);
        self.last_signals = incoming.clone();
    }
}

pub struct Governor {
    state: Mutex<GovernorState>,
    clock: Arc<dyn Clock>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_section(section: &GovernorSection) -> Result<Self, ConfigError> {
        Ok(Self::new(GovernorConfig::from_section(section)?))
    }

    /// Build with an injected clock; tests drive mode transitions and
    /// budget windows without sleeping.
    pub fn with_clock(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let initial = Decision {
            mode: Mode::ActiveCaptureOnly,
            heavy_allowed: false,
            reason: Reason::UserActive,
            budget_remaining_ms: config.heavy_budget_ms_per_window,
        };
        Self {
            state: Mutex::new(GovernorState {
                mode: Mode::ActiveCaptureOnly,
                mode_changed_at: now,
                last_signals: Signals::assume_active("boot"),
                last_seq: HashMap::new(),
                heavy_backlog: 0,
                budget: BudgetWindow::new(
                    config.heavy_budget_ms_per_window,
                    config.budget_window,
                    now,
                ),
                leases: HashMap::new(),
                last_decision: initial,
                latched_safe: false,
                counters: Counters::default(),
                config,
            }),
            clock,
        }
    }

    /// Store the latest signals without producing a decision. Lease and
    /// preemption checks recompute from the stored value, so callers
    /// that skip `decide` still get current admission verdicts.
    pub fn observe_signals(&self, incoming: &Signals) {
        self.state.lock().observe(incoming);
    }

    /// Evaluate the latest signals into a mode and heavy-work verdict.
    pub fn decide(&self, incoming: &Signals) -> Decision {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.observe(incoming);
        let decision = evaluate(&mut state, now);
        state.counters.decisions += 1;
        decision
    }

    /// Request permission to run one heavy job. Non-blocking: the answer
    /// is an immediate grant or a structured denial.
    pub fn lease(&self, estimated_ms: u64, require_gpu: bool) -> Lease {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let decision = evaluate(&mut state, now);

        if !decision.mode.allows_heavy() || !decision.heavy_allowed {
            state.counters.leases_denied += 1;
            return Lease::denied(decision.mode, decision.reason);
        }

        // Admission counts full grants of live leases, not their
        // accrual; a second lease must fit in what is genuinely left.
        let admissible = state.budget.remaining_after(state.reserved_ms());
        if admissible == 0 {
            state.counters.leases_denied += 1;
            return Lease::denied(decision.mode, Reason::BudgetExhausted);
        }

        let granted_ms = estimated_ms.min(admissible);
        let id = LeaseId::allocate();
        state.leases.insert(
            id,
            OutstandingLease {
                granted_ms,
                issued_at: now,
                require_gpu,
            },
        );
        state.counters.leases_granted += 1;
        Lease::granted(id, granted_ms, decision.mode, decision.reason)
    }

    /// Return a lease, charging the window with actual elapsed
    /// milliseconds (never the estimate).
    pub fn release(&self, lease_id: LeaseId, actual_ms: u64) {
        let mut state = self.state.lock();
        let now = self.clock.now();
        if state.leases.remove(&lease_id).is_none() {
            warn!(lease = %lease_id, "release for unknown lease; already reclaimed?");
            return;
        }
        if state.budget.charge(actual_ms).is_err() {
            latch_safe(&mut state, now, "budget charge overflow");
        }
    }

    /// Should the running heavy job yield now? Recomputes the decision
    /// so a mode flip is seen on the very next poll.
    pub fn should_preempt(&self, incoming: &Signals) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.observe(incoming);
        let decision = evaluate(&mut state, now);

        if decision.mode.allows_heavy() {
            // A heavy-allowing mode preempts only when the idle drain
            // ran itself dry; a forced query never yields by mode alone.
            return decision.mode == Mode::IdleDrain
                && !decision.heavy_allowed
                && matches!(
                    decision.reason,
                    Reason::BudgetExhausted | Reason::JobsExhausted
                );
        }

        let mut grace = state.config.preempt_grace;
        if !state.config.suspend_deadline.is_zero() {
            grace = if grace.is_zero() {
                state.config.suspend_deadline
            } else {
                grace.min(state.config.suspend_deadline)
            };
        }
        now.saturating_duration_since(state.mode_changed_at) >= grace
    }

    /// Reclaim leases whose holder went silent past
    /// `granted_ms + suspend_deadline_ms`, charging the full grant.
    pub fn sweep_expired_leases(&self) -> usize {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let pad = state.config.suspend_deadline;

        let expired: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, lease)| {
                now.saturating_duration_since(lease.issued_at)
                    >= Duration::from_millis(lease.granted_ms) + pad
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            let Some(lease) = state.leases.remove(id) else {
                continue;
            };
            warn!(
                lease = %id,
                granted_ms = lease.granted_ms,
                require_gpu = lease.require_gpu,
                "reclaiming unreleased lease"
            );
            if state.budget.charge(lease.granted_ms).is_err() {
                latch_safe(&mut state, now, "budget charge overflow");
                continue;
            }
            state.counters.leases_reclaimed += 1;
        }
        expired.len()
    }

    /// Scheduler's view of how much heavy work exists (queued plus
    /// running); zero turns idle-drain heavy verdicts into
    /// `jobs_exhausted`.
    pub fn note_heavy_backlog(&self, backlog: usize) {
        self.state.lock().heavy_backlog = backlog;
    }

    /// Runtime toggle from the operator surface.
    pub fn set_safe_mode(&self, enabled: bool) {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.config.safe_mode = enabled;
        evaluate(&mut state, now);
    }

    /// Clear a latched invariant breach. Heavy leases stay refused until
    /// this is called explicitly.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.latched_safe = false;
        evaluate(&mut state, now);
    }

    /// Replace the configuration atomically; an invalid section leaves
    /// the running config untouched.
    pub fn update_config(&self, section: &GovernorSection) -> Result<(), ConfigError> {
        let next = GovernorConfig::from_section(section)?;
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.budget.set_cap(next.heavy_budget_ms_per_window);
        state.budget.set_window(next.budget_window);
        state.config = next;
        evaluate(&mut state, now);
        Ok(())
    }

    /// Read-only snapshot for status queries; does not move
    /// `mode_changed_at` or recompute anything.
    pub fn status(&self) -> GovernorStatus {
        let state = self.state.lock();
        GovernorStatus {
            mode: state.last_decision.mode,
            reason: state.last_decision.reason,
            heavy_allowed: state.last_decision.heavy_allowed,
            budget_remaining_ms: state.last_decision.budget_remaining_ms,
            outstanding_leases: state.leases.len(),
            safe_mode_latched: state.latched_safe,
            decisions: state.counters.decisions,
            leases_granted: state.counters.leases_granted,
            leases_denied: state.counters.leases_denied,
            leases_reclaimed: state.counters.leases_reclaimed,
        }
    }

    /// Current configuration copy (for the job poll contract and the
    /// scheduler's deadlines).
    pub fn config(&self) -> GovernorConfig {
        self.state.lock().config
    }
}

/// Mode selection. Commits the mode transition timestamp and the last
/// decision; callers hold the state lock.
fn evaluate(state: &mut GovernorState, now: Instant) -> Decision {
    state.budget.roll(now);
    let remaining = state.budget.remaining_after(state.accrued_ms(now));
    let signals = &state.last_signals;

    let (mode, heavy_allowed, reason) = if state.config.safe_mode || state.latched_safe {
        (Mode::SafeMode, false, Reason::SafeMode)
    } else if signals.query_intent {
        // Forced query dominates user activity: an operator-issued
        // enrichment request runs even while the user is interacting.
        if remaining > 0 {
            (Mode::UserQuery, true, Reason::ForcedQuery)
        } else {
            (Mode::UserQuery, false, Reason::BudgetExhausted)
        }
    } else if !signals.user_active
        && signals.idle_seconds >= state.config.idle_window.as_secs_f64()
    {
        if remaining == 0 {
            (Mode::IdleDrain, false, Reason::BudgetExhausted)
        } else if state.heavy_backlog == 0 {
            (Mode::IdleDrain, false, Reason::JobsExhausted)
        } else {
            (Mode::IdleDrain, true, Reason::IdleWindow)
        }
    } else {
        (Mode::ActiveCaptureOnly, false, Reason::UserActive)
    };

    if mode != state.mode {
        debug!(from = state.mode.as_str(), to = mode.as_str(), "mode transition");
        state.mode = mode;
        state.mode_changed_at = now;
    }

    let decision = Decision {
        mode,
        heavy_allowed,
        reason,
        budget_remaining_ms: remaining,
    };
    state.last_decision = decision;
    decision
}

fn latch_safe(state: &mut GovernorState, now: Instant, why: &str) {
    error!(why, "governor invariant breached; latching safe mode");
    state.latched_safe = true;
    if state.mode != Mode::SafeMode {
        state.mode = Mode::SafeMode;
        state.mode_changed_at = now;
    }
    state.last_decision = Decision {
        mode: Mode::SafeMode,
        heavy_allowed: false,
        reason: Reason::SafeMode,
        budget_remaining_ms: state.budget.remaining_after(0),
    };
}
