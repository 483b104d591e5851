use std::sync::Arc;

use anyhow::Result;
use governor::{DecisionRecord, TelemetrySink};
use once_cell::sync::Lazy;
use prometheus::{opts, Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus registry fed from the governor's decision records.
pub struct ServiceMetrics {
    pub registry: Registry,
    pub decisions_total: IntCounter,
    pub jobs_admitted_total: IntCounter,
    pub jobs_deferred_total: IntCounter,
    pub jobs_preempted_total: IntCounter,
    pub heavy_allowed: IntGauge,
    pub budget_remaining_ms: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let decisions_total =
            IntCounter::with_opts(opts!("decisions_total", "Governor decisions made"))?;
        let jobs_admitted_total =
            IntCounter::with_opts(opts!("jobs_admitted_total", "Jobs started"))?;
        let jobs_deferred_total = IntCounter::with_opts(opts!(
            "jobs_deferred_total",
            "Heavy jobs pushed back on lease denial"
        ))?;
        let jobs_preempted_total =
            IntCounter::with_opts(opts!("jobs_preempted_total", "Jobs asked to yield"))?;
        let heavy_allowed = IntGauge::with_opts(opts!(
            "heavy_allowed",
            "1 when the current decision permits heavy work"
        ))?;
        let budget_remaining_ms = IntGauge::with_opts(opts!(
            "budget_remaining_ms",
            "Heavy-work budget left in the current window"
        ))?;

        registry.register(Box::new(decisions_total.clone()))?;
        registry.register(Box::new(jobs_admitted_total.clone()))?;
        registry.register(Box::new(jobs_deferred_total.clone()))?;
        registry.register(Box::new(jobs_preempted_total.clone()))?;
        registry.register(Box::new(heavy_allowed.clone()))?;
        registry.register(Box::new(budget_remaining_ms.clone()))?;

        Ok(Self {
            registry,
            decisions_total,
            jobs_admitted_total,
            jobs_deferred_total,
            jobs_preempted_total,
            heavy_allowed,
            budget_remaining_ms,
        })
    }
}

impl TelemetrySink for ServiceMetrics {
    fn record(&self, record: &DecisionRecord) {
        self.decisions_total.inc();
        self.jobs_admitted_total.inc_by(record.admitted);
        self.jobs_deferred_total.inc_by(record.deferred);
        self.jobs_preempted_total.inc_by(record.preempted);
        self.heavy_allowed
            .set(if record.heavy_allowed { 1 } else { 0 });
        self.budget_remaining_ms
            .set(record.budget_remaining_ms.min(i64::MAX as u64) as i64);
    }
}

/// Pushes each decision record to every configured sink (log line plus
/// prometheus, today).
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

impl TelemetrySink for FanoutSink {
    fn record(&self, record: &DecisionRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

/// Encode all metrics in Prometheus text format.
pub fn scrape_metrics(metrics: &ServiceMetrics) -> Result<String> {
    let mut buffer = Vec::new();
    let metric_families = metrics.registry.gather();
    ENCODER.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::{Mode, Reason};

    #[test]
    fn decision_records_move_the_counters() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record(&DecisionRecord {
            mode: Mode::IdleDrain,
            reason: Reason::IdleWindow,
            heavy_allowed: true,
            budget_remaining_ms: 42_000,
            admitted: 2,
            deferred: 1,
            preempted: 0,
        });

        assert_eq!(metrics.decisions_total.get(), 1);
        assert_eq!(metrics.jobs_admitted_total.get(), 2);
        assert_eq!(metrics.heavy_allowed.get(), 1);
        assert_eq!(metrics.budget_remaining_ms.get(), 42_000);

        let text = scrape_metrics(&metrics).unwrap();
        assert!(text.contains("decisions_total 1"));
        assert!(text.contains("budget_remaining_ms 42000"));
    }
}
