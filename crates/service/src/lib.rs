//! Service support library: tracing/logging bootstrap, prometheus
//! telemetry sink, and the Unix control-socket server.

#[cfg(unix)]
pub mod control;
pub mod logging;
pub mod metrics;

pub use logging::init as init_tracing;
pub use metrics::{scrape_metrics, FanoutSink, ServiceMetrics};
