//! Activity signals: the best-effort feed of user activity the governor
//! decides from. An out-of-process sidecar writes a small JSON file with
//! write-temp + atomic-rename at 4-20 Hz; this crate reads and
//! classifies it. Reads never fail: every I/O or parse problem collapses
//! to a stale/unavailable classification and a configured fallback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use core_types::config::SignalsSection;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on a signal file read; anything slower counts as
/// unavailable for this sample.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Signal files are tiny; a large one is a corrupt or wrong file.
const MAX_FILE_BYTES: u64 = 64 * 1024;

fn default_source() -> String {
    "unknown".into()
}

/// One activity record. Immutable once constructed; the governor keeps
/// only the latest value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signals {
    pub ts_utc: DateTime<Utc>,
    pub idle_seconds: f64,
    pub user_active: bool,
    /// Raised by forced ticks and operator commands, never by the
    /// sidecar file.
    #[serde(default)]
    pub query_intent: bool,
    #[serde(default = "default_source")]
    pub source: String,
    /// Monotonically non-decreasing per source.
    #[serde(default)]
    pub seq: u64,
}

impl Signals {
    /// Fallback used when failing closed: assume the user is present.
    pub fn assume_active(source: &str) -> Self {
        Self {
            ts_utc: Utc::now(),
            idle_seconds: 0.0,
            user_active: true,
            query_intent: false,
            source: source.into(),
            seq: 0,
        }
    }

    /// Fallback used when failing open: assume the machine is abandoned.
    pub fn assume_idle(source: &str) -> Self {
        Self {
            ts_utc: Utc::now(),
            idle_seconds: f64::INFINITY,
            user_active: false,
            query_intent: false,
            source: source.into(),
            seq: 0,
        }
    }

    /// Copy of this record with `query_intent` raised, as a forced tick
    /// merges it for exactly one decision.
    pub fn with_query_intent(&self) -> Self {
        let mut merged = self.clone();
        merged.query_intent = true;
        merged
    }
}

/// How the last read went. `Fresh` carries sidecar data; the other two
/// mean the sample below is a configured fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalHealth {
    Fresh,
    Stale,
    Unavailable,
}

/// Result of one reader sample: policy-applied signals plus how they
/// were obtained.
#[derive(Debug, Clone)]
pub struct SignalSample {
    pub signals: Signals,
    pub health: SignalHealth,
}

/// Reads the sidecar signal file and classifies staleness.
pub struct SignalReader {
    path: PathBuf,
    max_staleness: Duration,
    fail_open: bool,
}

impl SignalReader {
    pub fn new(path: impl Into<PathBuf>, max_staleness: Duration, fail_open: bool) -> Self {
        Self {
            path: path.into(),
            max_staleness,
            fail_open,
        }
    }

    pub fn from_section(section: &SignalsSection) -> Self {
        Self::new(
            section.path.clone(),
            Duration::from_secs_f64(section.max_staleness_s.max(0.0)),
            section.fail_open,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current signals. Never errors; stale or unreadable input
    /// yields the fail-open or fail-closed fallback record.
    pub fn sample(&self) -> SignalSample {
        match self.read_raw() {
            Some(signals) => {
                let age = Utc::now().signed_duration_since(signals.ts_utc);
                let stale = match age.to_std() {
                    Ok(age) => age > self.max_staleness,
                    // ts_utc in the future: producer clock skew, accept it.
                    Err(_) => false,
                };
                if stale {
                    debug!(age_ms = age.num_milliseconds(), "signal file is stale");
                    self.fallback(SignalHealth::Stale)
                } else {
                    SignalSample {
                        signals: normalize(signals),
                        health: SignalHealth::Fresh,
                    }
                }
            }
            None => self.fallback(SignalHealth::Unavailable),
        }
    }

    fn fallback(&self, health: SignalHealth) -> SignalSample {
        let signals = if self.fail_open {
            Signals::assume_idle("fallback")
        } else {
            Signals::assume_active("fallback")
        };
        SignalSample { signals, health }
    }

    fn read_raw(&self) -> Option<Signals> {
        let raw = read_bounded(&self.path, READ_TIMEOUT)?;
        match serde_json::from_str::<Signals>(&raw) {
            Ok(signals) => Some(signals),
            Err(err) => {
                debug!(error = %err, path = %self.path.display(), "signal file unparsable");
                None
            }
        }
    }
}

fn normalize(mut signals: Signals) -> Signals {
    if !signals.idle_seconds.is_finite() || signals.idle_seconds < 0.0 {
        signals.idle_seconds = 0.0;
    }
    signals
}

/// Read a small file with a hard wall-clock bound. The read runs on a
/// detached thread; on timeout the sender drops into a bounded channel
/// nobody is listening to.
fn read_bounded(path: &Path, timeout: Duration) -> Option<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let path = path.to_path_buf();

    std::thread::spawn(move || {
        let result = std::fs::metadata(&path)
            .ok()
            .filter(|meta| meta.len() <= MAX_FILE_BYTES)
            .and_then(|_| std::fs::read_to_string(&path).ok());
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "signal file read timed out");
            None
        }
    }
}
