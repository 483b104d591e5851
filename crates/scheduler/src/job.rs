//! The job contract: what heavy and light work promises about
//! cancellation and progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_types::JobFlags;
use governor::Governor;
use parking_lot::Mutex;
use signals::Signals;

/// What a work function reports back. `Yielded` means the job observed a
/// positive preemption check and suspended cleanly; it re-enters the
/// queue without consuming an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    Completed,
    Yielded,
}

/// The work callable. Heavy jobs must call the handle at least every
/// `preempt_poll_ms` and return within the suspend deadline once it
/// answers true.
pub type WorkFn = Box<dyn FnMut(&PreemptHandle) -> anyhow::Result<JobProgress> + Send>;

pub struct Job {
    pub name: String,
    pub flags: JobFlags,
    /// Heavy-work estimate; defaults to the configured heavy estimate.
    pub estimated_ms: Option<u64>,
    /// Higher runs first within the same class.
    pub priority: i32,
    pub max_attempts: u32,
    pub work: WorkFn,
}

impl Job {
    pub fn new(name: impl Into<String>, flags: JobFlags, work: WorkFn) -> Self {
        Self {
            name: name.into(),
            flags,
            estimated_ms: None,
            priority: 0,
            max_attempts: 3,
            work,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate_ms(mut self, estimated_ms: u64) -> Self {
        self.estimated_ms = Some(estimated_ms);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("estimated_ms", &self.estimated_ms)
            .field("priority", &self.priority)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Surfaced through the dead-letter callback when retries are spent.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub name: String,
    pub attempts: u32,
    pub error: String,
}

pub type DeadLetterFn = Arc<dyn Fn(DeadLetter) + Send + Sync>;

/// Preemption-check handle passed into every work function.
///
/// For governed (heavy, preemptible) jobs `should_yield` consults the
/// governor with the latest signals; for light and non-preemptible jobs
/// it only reflects the coordinator's cancel flag.
pub struct PreemptHandle {
    governor: Option<Arc<Governor>>,
    latest_signals: Arc<Mutex<Signals>>,
    cancel: Arc<AtomicBool>,
    poll_every: Duration,
}

impl PreemptHandle {
    pub(crate) fn governed(
        governor: Arc<Governor>,
        latest_signals: Arc<Mutex<Signals>>,
        cancel: Arc<AtomicBool>,
        poll_every: Duration,
    ) -> Self {
        Self {
            governor: Some(governor),
            latest_signals,
            cancel,
            poll_every,
        }
    }

    pub(crate) fn detached(latest_signals: Arc<Mutex<Signals>>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            governor: None,
            latest_signals,
            cancel,
            poll_every: Duration::MAX,
        }
    }

    /// Must the job suspend now? Heavy jobs call this at least every
    /// `poll_every`.
    pub fn should_yield(&self) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        match &self.governor {
            Some(governor) => {
                let current = self.latest_signals.lock().clone();
                governor.should_preempt(&current)
            }
            None => false,
        }
    }

    /// The poll contract: call `should_yield` at least this often.
    pub fn poll_every(&self) -> Duration {
        self.poll_every
    }
}
