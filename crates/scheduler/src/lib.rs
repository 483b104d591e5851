//! Scheduler: owns the job queue, admits work through the governor, and
//! drives heavy jobs on worker threads with cooperative preemption. The
//! conductor module holds the thin per-tick driver; decision logic stays
//! in the governor crate so it remains testable on its own.
//!
//! The queue lock is disjoint from the governor lock; governor methods
//! are always called with the queue lock released.

pub mod conductor;

mod backoff;
mod job;

pub use conductor::Conductor;
pub use job::{DeadLetter, DeadLetterFn, Job, JobProgress, PreemptHandle, WorkFn};

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use core_types::config::SchedulerSection;
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use core_types::JobFlags;
use governor::{Governor, LeaseId, Mode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use signals::Signals;
use tracing::{debug, warn};
use thiserror::Error;

/// Static scheduler knobs, validated from the file section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_jobs_per_tick: usize,
    pub cpu_worker_slots: usize,
    pub gpu_worker_slots: usize,
    pub default_heavy_estimate_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerConfigError {
    #[error("max_jobs_per_tick must be positive")]
    ZeroJobsPerTick,
    #[error("cpu_worker_slots must be positive")]
    ZeroCpuSlots,
}

impl SchedulerConfig {
    pub fn from_section(section: &SchedulerSection) -> Result<Self, SchedulerConfigError> {
        if section.max_jobs_per_tick == 0 {
            return Err(SchedulerConfigError::ZeroJobsPerTick);
        }
        if section.cpu_worker_slots == 0 {
            return Err(SchedulerConfigError::ZeroCpuSlots);
        }
        Ok(Self {
            max_jobs_per_tick: section.max_jobs_per_tick,
            cpu_worker_slots: section.cpu_worker_slots,
            gpu_worker_slots: section.gpu_worker_slots,
            default_heavy_estimate_ms: section.default_heavy_estimate_ms,
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jobs_per_tick: 8,
            cpu_worker_slots: 2,
            gpu_worker_slots: 1,
            default_heavy_estimate_ms: 5_000,
        }
    }
}

/// Per-tick movement, folded into the cumulative totals.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub admitted: u64,
    pub deferred: u64,
    pub preempted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rogue: u64,
}

/// Cumulative counters for the operator surface.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerTotals {
    pub admitted: u64,
    pub deferred: u64,
    pub preempted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rogue: u64,
    pub dead_lettered: u64,
}

impl SchedulerTotals {
    fn accumulate(&mut self, stats: &TickStats) {
        self.admitted += stats.admitted;
        self.deferred += stats.deferred;
        self.preempted += stats.preempted;
        self.completed += stats.completed;
        self.failed += stats.failed;
        self.rogue += stats.rogue;
    }
}

/// Queue and worker depths for status queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub queued_heavy: usize,
    pub queued_light: usize,
    pub running: usize,
    pub cooling_down: usize,
    pub totals: SchedulerTotals,
}

struct QueuedEntry {
    job: Job,
    attempt: u32,
    seq: u64,
    not_before: Option<Instant>,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, earlier seq breaks ties.
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct WorkerReport {
    outcome: anyhow::Result<JobProgress>,
    actual_ms: u64,
    work: WorkFn,
}

struct RunningJob {
    name: String,
    flags: JobFlags,
    priority: i32,
    estimated_ms: Option<u64>,
    max_attempts: u32,
    attempt: u32,
    lease_id: LeaseId,
    granted_ms: u64,
    started_at: Instant,
    cancel: Arc<AtomicBool>,
    report_rx: Receiver<WorkerReport>,
}

#[derive(Default)]
struct Inner {
    queue: BinaryHeap<QueuedEntry>,
    next_seq: u64,
    cooldown: HashMap<String, Instant>,
    totals: SchedulerTotals,
}

pub struct Scheduler {
    governor: Arc<Governor>,
    config: SchedulerConfig,
    latest_signals: Arc<Mutex<Signals>>,
    inner: Mutex<Inner>,
    running: Mutex<Vec<RunningJob>>,
    dead_letter: Mutex<Option<DeadLetterFn>>,
}

impl Scheduler {
    pub fn new(governor: Arc<Governor>, config: SchedulerConfig) -> Self {
        Self {
            governor,
            config,
            latest_signals: Arc::new(Mutex::new(Signals::assume_active("boot"))),
            inner: Mutex::new(Inner::default()),
            running: Mutex::new(Vec::new()),
            dead_letter: Mutex::new(None),
        }
    }

    /// Callback invoked when a job exhausts its attempts.
    pub fn set_dead_letter(&self, callback: DeadLetterFn) {
        *self.dead_letter.lock() = Some(callback);
    }

    pub fn enqueue(&self, job: Job) {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        debug!(job = %job.name, heavy = job.flags.is_heavy(), priority = job.priority, "enqueued");
        inner.queue.push(QueuedEntry {
            job,
            attempt: 1,
            seq,
            not_before: None,
        });
    }

    /// Queued plus running heavy jobs; feeds the governor's
    /// `jobs_exhausted` verdict.
    pub fn heavy_backlog(&self) -> usize {
        let queued = {
            let inner = self.inner.lock();
            inner
                .queue
                .iter()
                .filter(|entry| entry.job.flags.is_heavy())
                .count()
        };
        queued + self.running.lock().len()
    }

    pub fn sync_backlog(&self) {
        self.governor.note_heavy_backlog(self.heavy_backlog());
    }

    pub fn status(&self) -> SchedulerStatus {
        let (queued_heavy, queued_light, cooling_down, totals) = {
            let inner = self.inner.lock();
            let heavy = inner
                .queue
                .iter()
                .filter(|entry| entry.job.flags.is_heavy())
                .count();
            (
                heavy,
                inner.queue.len() - heavy,
                inner.cooldown.len(),
                inner.totals,
            )
        };
        SchedulerStatus {
            queued_heavy,
            queued_light,
            running: self.running.lock().len(),
            cooling_down,
            totals,
        }
    }

    /// Run one admission pass: reap finished workers, enforce
    /// preemption, then start pending work under the governor's rules.
    pub fn run_pending(&self, current: &Signals) -> TickStats {
        *self.latest_signals.lock() = current.clone();
        self.governor.observe_signals(current);

        let mut stats = TickStats::default();
        self.reap_finished(&mut stats);
        // Preemption checks must see the true backlog, or a lone
        // running job with an empty queue reads as jobs_exhausted.
        self.sync_backlog();
        self.enforce_preemption(current, &mut stats);
        self.admit_pending(&mut stats);
        self.sync_backlog();

        self.inner.lock().totals.accumulate(&stats);
        stats
    }

    fn reap_finished(&self, stats: &mut TickStats) {
        let mut finished = Vec::new();
        let mut lost = Vec::new();
        {
            let mut running = self.running.lock();
            let mut i = 0;
            while i < running.len() {
                match running[i].report_rx.try_recv() {
                    Ok(report) => {
                        let job = running.swap_remove(i);
                        finished.push((job, report));
                    }
                    Err(TryRecvError::Empty) => i += 1,
                    Err(TryRecvError::Disconnected) => {
                        let job = running.swap_remove(i);
                        lost.push(job);
                    }
                }
            }
        }

        for (job, report) in finished {
            self.settle(job, report, stats);
        }
        for job in lost {
            // Worker died without reporting; the work function is gone,
            // so retries are off the table.
            let elapsed_ms = job.started_at.elapsed().as_millis() as u64;
            warn!(job = %job.name, elapsed_ms, "worker vanished without a report");
            self.governor.release(job.lease_id, elapsed_ms);
            stats.failed += 1;
            self.dead_letter_job(&job.name, job.attempt, &anyhow!("worker vanished"));
        }
    }

    fn enforce_preemption(&self, current: &Signals, stats: &mut TickStats) {
        if self.running.lock().is_empty() {
            return;
        }
        let gov_config = self.governor.config();
        let suspend_deadline = gov_config.suspend_deadline;
        let preempt_now = self.governor.should_preempt(current);

        let mut settled = Vec::new();
        let mut rogues = Vec::new();
        {
            let mut running = self.running.lock();
            let now = Instant::now();
            let mut i = 0;
            while i < running.len() {
                let hard_deadline = running[i].started_at
                    + Duration::from_millis(running[i].granted_ms)
                    + suspend_deadline;
                if now >= hard_deadline {
                    let job = running.swap_remove(i);
                    // A report may have landed since the reap pass;
                    // settling beats tagging a finished job rogue.
                    match job.report_rx.try_recv() {
                        Ok(report) => settled.push((job, report)),
                        Err(_) => rogues.push(job),
                    }
                    continue;
                }
                if preempt_now && running[i].flags.is_preemptible() {
                    let job = running.swap_remove(i);
                    job.cancel.store(true, Ordering::Relaxed);
                    match job.report_rx.recv_timeout(suspend_deadline) {
                        Ok(report) => settled.push((job, report)),
                        Err(_) => rogues.push(job),
                    }
                    continue;
                }
                i += 1;
            }
        }

        for (job, report) in settled {
            self.settle(job, report, stats);
        }
        for job in rogues {
            self.mark_rogue(job, gov_config.budget_window, stats);
        }
    }

    fn mark_rogue(&self, job: RunningJob, budget_window: Duration, stats: &mut TickStats) {
        let elapsed_ms = job.started_at.elapsed().as_millis() as u64;
        warn!(
            job = %job.name,
            granted_ms = job.granted_ms,
            elapsed_ms,
            "job ignored the preemption contract; marking rogue"
        );
        // Charged at the full overrun, and excluded for a whole window.
        self.governor.release(job.lease_id, elapsed_ms);
        self.inner
            .lock()
            .cooldown
            .insert(job.name, Instant::now() + budget_window);
        stats.rogue += 1;
    }

    fn settle(&self, job: RunningJob, report: WorkerReport, stats: &mut TickStats) {
        self.governor.release(job.lease_id, report.actual_ms);
        match report.outcome {
            Ok(JobProgress::Completed) => {
                debug!(job = %job.name, actual_ms = report.actual_ms, "completed");
                stats.completed += 1;
            }
            Ok(JobProgress::Yielded) => {
                debug!(job = %job.name, actual_ms = report.actual_ms, "suspended on preemption");
                stats.preempted += 1;
                // Preemption does not consume an attempt.
                self.requeue(rebuild(job, report.work), None);
            }
            Err(err) => self.fail(rebuild(job, report.work), err, stats),
        }
    }

    fn fail(&self, (job, attempt): (Job, u32), err: anyhow::Error, stats: &mut TickStats) {
        stats.failed += 1;
        if attempt < job.max_attempts {
            let delay = backoff::retry_delay(attempt);
            debug!(
                job = %job.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying with backoff"
            );
            self.requeue((job, attempt + 1), Some(Instant::now() + delay));
        } else {
            warn!(job = %job.name, attempts = attempt, error = %err, "retries exhausted");
            self.dead_letter_job(&job.name, attempt, &err);
        }
    }

    fn dead_letter_job(&self, name: &str, attempts: u32, err: &anyhow::Error) {
        self.inner.lock().totals.dead_lettered += 1;
        let callback = self.dead_letter.lock().clone();
        if let Some(callback) = callback {
            callback(DeadLetter {
                name: name.to_string(),
                attempts,
                error: err.to_string(),
            });
        }
    }

    fn requeue(&self, (job, attempt): (Job, u32), not_before: Option<Instant>) {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.queue.push(QueuedEntry {
            job,
            attempt,
            seq,
            not_before,
        });
    }

    fn admit_pending(&self, stats: &mut TickStats) {
        let now = Instant::now();
        let mut started = 0usize;
        let mut heavy_blocked = false;
        let mut put_back: Vec<QueuedEntry> = Vec::new();
        // Bound the scan: entries pushed back this tick are not revisited.
        let scan_limit = self.inner.lock().queue.len();

        for _ in 0..scan_limit {
            if started >= self.config.max_jobs_per_tick {
                break;
            }
            let Some(entry) = self.inner.lock().queue.pop() else {
                break;
            };

            if let Some(due) = entry.not_before {
                if due > now {
                    put_back.push(entry);
                    continue;
                }
            }

            if !entry.job.flags.is_heavy() {
                self.run_light(entry, stats);
                started += 1;
                continue;
            }

            // One lease denial settles the question for the whole tick;
            // pushing the same job through the governor again would just
            // spin.
            if heavy_blocked {
                stats.deferred += 1;
                put_back.push(entry);
                continue;
            }

            if self.cooling_down(&entry.job.name, now) {
                stats.deferred += 1;
                put_back.push(entry);
                continue;
            }

            let needs_gpu = entry.job.flags.requires_gpu();
            if !self.slot_free(needs_gpu) {
                stats.deferred += 1;
                put_back.push(entry);
                continue;
            }

            let estimate = entry
                .job
                .estimated_ms
                .unwrap_or(self.config.default_heavy_estimate_ms);
            let lease = self.governor.lease(estimate, needs_gpu);
            if !lease.allowed {
                debug!(
                    job = %entry.job.name,
                    mode = lease.mode.as_str(),
                    reason = lease.reason.as_str(),
                    "lease denied; deferring"
                );
                stats.deferred += 1;
                heavy_blocked = true;
                put_back.push(entry);
                continue;
            }

            // Jobs that cannot honor the poll contract only run during
            // idle drain, where they may consume their grant whole.
            if !entry.job.flags.is_preemptible() && lease.mode != Mode::IdleDrain {
                if let Some(id) = lease.lease_id {
                    self.governor.release(id, 0);
                }
                stats.deferred += 1;
                put_back.push(entry);
                continue;
            }

            let Some(lease_id) = lease.lease_id else {
                stats.deferred += 1;
                put_back.push(entry);
                continue;
            };

            self.spawn_worker(entry, lease_id, lease.granted_ms, stats);
            started += 1;
        }

        let mut inner = self.inner.lock();
        for entry in put_back {
            inner.queue.push(entry);
        }
    }

    fn cooling_down(&self, name: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.cooldown.get(name) {
            Some(&until) if until > now => true,
            Some(_) => {
                inner.cooldown.remove(name);
                false
            }
            None => false,
        }
    }

    fn slot_free(&self, needs_gpu: bool) -> bool {
        let running = self.running.lock();
        let gpu_used = running.iter().filter(|job| job.flags.requires_gpu()).count();
        if needs_gpu {
            gpu_used < self.config.gpu_worker_slots
        } else {
            running.len() - gpu_used < self.config.cpu_worker_slots
        }
    }

    fn run_light(&self, mut entry: QueuedEntry, stats: &mut TickStats) {
        stats.admitted += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = PreemptHandle::detached(self.latest_signals.clone(), cancel);
        match (entry.job.work)(&handle) {
            Ok(_) => stats.completed += 1,
            Err(err) => self.fail((entry.job, entry.attempt), err, stats),
        }
    }

    fn spawn_worker(
        &self,
        entry: QueuedEntry,
        lease_id: LeaseId,
        granted_ms: u64,
        stats: &mut TickStats,
    ) {
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = if entry.job.flags.is_preemptible() {
            PreemptHandle::governed(
                self.governor.clone(),
                self.latest_signals.clone(),
                cancel.clone(),
                self.governor.config().preempt_poll,
            )
        } else {
            PreemptHandle::detached(self.latest_signals.clone(), cancel.clone())
        };

        let (report_tx, report_rx) = bounded(1);
        let QueuedEntry {
            job, attempt, ..
        } = entry;
        let Job {
            name,
            flags,
            estimated_ms,
            priority,
            max_attempts,
            mut work,
        } = job;

        let thread_name = format!("job-{name}");
        let spawned = std::thread::Builder::new().name(thread_name).spawn(move || {
            let started = Instant::now();
            let outcome = work(&handle);
            let actual_ms = started.elapsed().as_millis() as u64;
            let _ = report_tx.send(WorkerReport {
                outcome,
                actual_ms,
                work,
            });
        });

        match spawned {
            Ok(_detached) => {
                debug!(job = %name, granted_ms, "admitted");
                stats.admitted += 1;
                self.running.lock().push(RunningJob {
                    name,
                    flags,
                    priority,
                    estimated_ms,
                    max_attempts,
                    attempt,
                    lease_id,
                    granted_ms,
                    started_at: Instant::now(),
                    cancel,
                    report_rx,
                });
            }
            Err(err) => {
                warn!(job = %name, error = %err, "failed to spawn worker thread");
                self.governor.release(lease_id, 0);
                stats.failed += 1;
                self.dead_letter_job(&name, attempt, &anyhow!("worker spawn failed: {err}"));
            }
        }
    }
}

fn rebuild(job: RunningJob, work: WorkFn) -> (Job, u32) {
    (
        Job {
            name: job.name,
            flags: job.flags,
            estimated_ms: job.estimated_ms,
            priority: job.priority,
            max_attempts: job.max_attempts,
            work,
        },
        job.attempt,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use governor::{GovernorConfig, Reason};
    use std::sync::atomic::AtomicU32;

    fn sig(user_active: bool, idle_seconds: f64, query_intent: bool) -> Signals {
        Signals {
            ts_utc: Utc::now(),
            idle_seconds,
            user_active,
            query_intent,
            source: "test".into(),
            seq: 1,
        }
    }

    fn idle() -> Signals {
        sig(false, 60.0, false)
    }

    fn active() -> Signals {
        sig(true, 0.0, false)
    }

    fn forced() -> Signals {
        sig(true, 0.0, true)
    }

    fn setup(config: GovernorConfig) -> (Arc<Governor>, Scheduler) {
        let governor = Arc::new(Governor::new(config));
        let scheduler = Scheduler::new(governor.clone(), SchedulerConfig::default());
        (governor, scheduler)
    }

    fn drive(scheduler: &Scheduler, signals: &Signals, until: impl Fn(&SchedulerStatus) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            scheduler.run_pending(signals);
            if until(&scheduler.status()) {
                return;
            }
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(15));
        }
    }

    fn counting_job(name: &str, flags: JobFlags, counter: &Arc<AtomicU32>) -> Job {
        let counter = counter.clone();
        Job::new(
            name,
            flags,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobProgress::Completed)
            }),
        )
    }

    #[test]
    fn active_user_blocks_heavy_but_runs_light() {
        let (governor, scheduler) = setup(GovernorConfig::default());
        let heavy_runs = Arc::new(AtomicU32::new(0));
        let light_runs = Arc::new(AtomicU32::new(0));
        scheduler.enqueue(counting_job("ocr", JobFlags::HEAVY, &heavy_runs));
        scheduler.enqueue(counting_job("ledger-append", JobFlags::empty(), &light_runs));

        let stats = scheduler.run_pending(&active());

        assert_eq!(light_runs.load(Ordering::SeqCst), 1);
        assert_eq!(heavy_runs.load(Ordering::SeqCst), 0);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.deferred, 1);
        assert_eq!(governor.status().reason, Reason::UserActive);
        assert_eq!(scheduler.status().queued_heavy, 1);
    }

    #[test]
    fn priority_runs_first_fifo_breaks_ties() {
        let (_governor, scheduler) = setup(GovernorConfig::default());
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("first-low", 0), ("second-low", 0), ("high", 5)] {
            let order = order.clone();
            scheduler.enqueue(
                Job::new(
                    name,
                    JobFlags::empty(),
                    Box::new(move |_| {
                        order.lock().push(name);
                        Ok(JobProgress::Completed)
                    }),
                )
                .with_priority(priority),
            );
        }

        scheduler.run_pending(&active());
        assert_eq!(*order.lock(), vec!["high", "first-low", "second-low"]);
    }

    #[test]
    fn forced_query_admits_heavy_exactly_once() {
        let (governor, scheduler) = setup(GovernorConfig::default());
        let runs = Arc::new(AtomicU32::new(0));
        scheduler.enqueue(counting_job("vision", JobFlags::HEAVY, &runs));

        let stats = scheduler.run_pending(&forced());
        assert_eq!(stats.admitted, 1);
        assert_eq!(governor.status().mode, Mode::UserQuery);

        drive(&scheduler, &forced(), |status| status.totals.completed >= 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(governor.status().leases_granted, 1);
    }

    #[test]
    fn idle_window_admits_heavy() {
        let (_governor, scheduler) = setup(GovernorConfig::default());
        let runs = Arc::new(AtomicU32::new(0));
        scheduler.enqueue(counting_job("index-commit", JobFlags::HEAVY, &runs));

        drive(&scheduler, &idle(), |status| status.totals.completed >= 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_job_retries_after_backoff() {
        let (_governor, scheduler) = setup(GovernorConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        scheduler.enqueue(Job::new(
            "flaky",
            JobFlags::empty(),
            Box::new(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(JobProgress::Completed)
                }
            }),
        ));

        let stats = scheduler.run_pending(&active());
        assert_eq!(stats.failed, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // Not due yet: the first retry backs off 250ms (+-20%).
        scheduler.run_pending(&active());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(350));
        let stats = scheduler.run_pending(&active());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn exhausted_retries_surface_through_dead_letter() {
        let (_governor, scheduler) = setup(GovernorConfig::default());
        let letters: Arc<Mutex<Vec<DeadLetter>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = letters.clone();
        scheduler.set_dead_letter(Arc::new(move |letter| sink.lock().push(letter)));

        scheduler.enqueue(
            Job::new(
                "doomed",
                JobFlags::empty(),
                Box::new(|_| Err(anyhow!("permanent"))),
            )
            .with_max_attempts(1),
        );

        scheduler.run_pending(&active());
        let letters = letters.lock();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].name, "doomed");
        assert_eq!(letters[0].attempts, 1);
        assert_eq!(scheduler.status().totals.dead_lettered, 1);
        assert_eq!(scheduler.status().queued_light, 0);
    }

    #[test]
    fn preempted_heavy_requeues_without_burning_an_attempt() {
        let config = GovernorConfig {
            preempt_grace: Duration::from_millis(10),
            suspend_deadline: Duration::from_millis(200),
            ..GovernorConfig::default()
        };
        let (_governor, scheduler) = setup(config);

        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        scheduler.enqueue(Job::new(
            "interruptible",
            JobFlags::HEAVY,
            Box::new(move |handle| {
                counter.fetch_add(1, Ordering::SeqCst);
                let started = Instant::now();
                loop {
                    if handle.should_yield() {
                        return Ok(JobProgress::Yielded);
                    }
                    if started.elapsed() > Duration::from_millis(100) {
                        return Ok(JobProgress::Completed);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }),
        ));

        let stats = scheduler.run_pending(&idle());
        assert_eq!(stats.admitted, 1);
        std::thread::sleep(Duration::from_millis(30));

        // User comes back; the job observes preemption and suspends.
        drive(&scheduler, &active(), |status| status.totals.preempted >= 1);
        let status = scheduler.status();
        assert_eq!(status.queued_heavy, 1);
        assert_eq!(status.totals.failed, 0);

        // Idle again: the same job is re-admitted and finishes.
        drive(&scheduler, &idle(), |status| status.totals.completed >= 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.status().totals.dead_lettered, 0);
    }

    #[test]
    fn rogue_overrun_is_charged_and_cooled_down() {
        let config = GovernorConfig {
            suspend_deadline: Duration::from_millis(100),
            ..GovernorConfig::default()
        };
        let (governor, scheduler) = setup(config);

        scheduler.enqueue(
            Job::new(
                "stubborn",
                JobFlags::HEAVY,
                Box::new(|_| {
                    std::thread::sleep(Duration::from_millis(400));
                    Ok(JobProgress::Completed)
                }),
            )
            .with_estimate_ms(50),
        );

        let stats = scheduler.run_pending(&idle());
        assert_eq!(stats.admitted, 1);

        // Past granted_ms + suspend_deadline with no poll: rogue.
        std::thread::sleep(Duration::from_millis(220));
        let stats = scheduler.run_pending(&idle());
        assert_eq!(stats.rogue, 1);
        assert_eq!(scheduler.status().running, 0);

        // The overrun was charged in full, well past the 50ms grant.
        let decision = governor.decide(&idle());
        assert!(decision.budget_remaining_ms <= 60_000 - 150);

        // Same name is excluded for a whole budget window.
        scheduler.enqueue(
            Job::new(
                "stubborn",
                JobFlags::HEAVY,
                Box::new(|_| Ok(JobProgress::Completed)),
            )
            .with_estimate_ms(50),
        );
        let stats = scheduler.run_pending(&idle());
        assert_eq!(stats.admitted, 0);
        assert_eq!(stats.deferred, 1);
        assert_eq!(scheduler.status().cooling_down, 1);
    }

    #[test]
    fn non_preemptible_runs_only_in_idle_drain() {
        let (_governor, scheduler) = setup(GovernorConfig::default());
        let runs = Arc::new(AtomicU32::new(0));
        scheduler.enqueue(counting_job(
            "compaction",
            JobFlags::HEAVY | JobFlags::NON_PREEMPTIBLE,
            &runs,
        ));

        // Forced query allows heavy, but not jobs that cannot poll.
        let stats = scheduler.run_pending(&forced());
        assert_eq!(stats.admitted, 0);
        assert_eq!(stats.deferred, 1);

        drive(&scheduler, &idle(), |status| status.totals.completed >= 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gpu_slots_bound_concurrent_admissions() {
        let governor = Arc::new(Governor::new(GovernorConfig::default()));
        let scheduler = Scheduler::new(
            governor.clone(),
            SchedulerConfig {
                gpu_worker_slots: 1,
                ..SchedulerConfig::default()
            },
        );

        for name in ["vlm-a", "vlm-b"] {
            scheduler.enqueue(Job::new(
                name,
                JobFlags::HEAVY | JobFlags::REQUIRE_GPU,
                Box::new(|_| {
                    std::thread::sleep(Duration::from_millis(80));
                    Ok(JobProgress::Completed)
                }),
            ));
        }

        let stats = scheduler.run_pending(&idle());
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.deferred, 1);

        drive(&scheduler, &idle(), |status| status.totals.completed >= 2);
    }

    #[test]
    fn config_rejects_zero_slots() {
        let section = SchedulerSection {
            cpu_worker_slots: 0,
            ..SchedulerSection::default()
        };
        assert_eq!(
            SchedulerConfig::from_section(&section),
            Err(SchedulerConfigError::ZeroCpuSlots)
        );
    }
}
