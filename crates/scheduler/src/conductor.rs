//! Conductor: the thin per-tick driver. Samples signals, lets the
//! governor decide, runs pending work, sweeps silent leases, and emits
//! one telemetry record. A forced tick merges `query_intent=true` into
//! the sampled signals for exactly one decision.

use std::sync::Arc;

use governor::{Decision, DecisionRecord, Governor, TelemetrySink};
use signals::{SignalHealth, SignalReader};
use tracing::debug;

use crate::Scheduler;

pub struct Conductor {
    reader: SignalReader,
    governor: Arc<Governor>,
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn TelemetrySink>,
}

impl Conductor {
    pub fn new(
        reader: SignalReader,
        governor: Arc<Governor>,
        scheduler: Arc<Scheduler>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            reader,
            governor,
            scheduler,
            sink,
        }
    }

    pub fn tick(&self) -> Decision {
        self.run_once(false)
    }

    pub fn run_once(&self, force: bool) -> Decision {
        let sample = self.reader.sample();
        if sample.health != SignalHealth::Fresh {
            debug!(health = ?sample.health, "signal sample degraded; using fallback");
        }
        let signals = if force {
            sample.signals.with_query_intent()
        } else {
            sample.signals
        };

        self.scheduler.sync_backlog();
        let decision = self.governor.decide(&signals);
        let stats = self.scheduler.run_pending(&signals);
        self.governor.sweep_expired_leases();

        self.sink.record(&DecisionRecord::from_decision(
            &decision,
            stats.admitted,
            stats.deferred,
            stats.preempted,
        ));
        decision
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Job, JobProgress, SchedulerConfig};
    use core_types::JobFlags;
    use governor::{GovernorConfig, Mode, NullSink};
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CaptureSink(Mutex<Vec<DecisionRecord>>);

    impl TelemetrySink for CaptureSink {
        fn record(&self, record: &DecisionRecord) {
            self.0.lock().push(record.clone());
        }
    }

    fn write_active_signals(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("activity.json");
        let body = format!(
            r#"{{"ts_utc":"{}","idle_seconds":0.5,"user_active":true,"source":"inproc","seq":3}}"#,
            chrono::Utc::now().to_rfc3339()
        );
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn conductor_with(path: std::path::PathBuf, sink: Arc<dyn TelemetrySink>) -> Conductor {
        let governor = Arc::new(Governor::new(GovernorConfig::default()));
        let scheduler = Arc::new(Scheduler::new(governor.clone(), SchedulerConfig::default()));
        let reader = SignalReader::new(path, Duration::from_secs(3), false);
        Conductor::new(reader, governor, scheduler, sink)
    }

    #[test]
    fn forced_tick_overrides_an_active_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_active_signals(&dir);
        let conductor = conductor_with(path, Arc::new(NullSink));

        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        conductor.scheduler().enqueue(Job::new(
            "ocr-batch",
            JobFlags::HEAVY,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobProgress::Completed)
            }),
        ));

        let decision = conductor.run_once(true);
        assert_eq!(decision.mode, Mode::UserQuery);
        assert!(decision.heavy_allowed);

        // Let the worker finish and the next tick reap it.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            std::thread::sleep(Duration::from_millis(20));
            conductor.run_once(true);
            if conductor.scheduler().status().totals.completed >= 1 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "job never completed");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn plain_tick_with_active_user_defers_heavy() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_active_signals(&dir);
        let sink = Arc::new(CaptureSink(Mutex::new(Vec::new())));
        let conductor = conductor_with(path, sink.clone());

        conductor.scheduler().enqueue(Job::new(
            "vision-extract",
            JobFlags::HEAVY,
            Box::new(|_| Ok(JobProgress::Completed)),
        ));

        let decision = conductor.tick();
        assert_eq!(decision.mode, Mode::ActiveCaptureOnly);
        assert!(!decision.heavy_allowed);

        let records = sink.0.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].deferred, 1);
        assert_eq!(records[0].admitted, 0);
    }

    #[test]
    fn missing_signal_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let conductor = conductor_with(dir.path().join("missing.json"), Arc::new(NullSink));
        let decision = conductor.tick();
        assert_eq!(decision.mode, Mode::ActiveCaptureOnly);
        assert!(!decision.heavy_allowed);
    }
}
