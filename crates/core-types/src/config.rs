//! File-backed configuration for the Autocapture daemon.
//!
//! The on-disk shape is TOML split into per-component sections. Every
//! section rejects unknown keys so a typo in an operator-edited file
//! surfaces as a load error instead of silently falling back to a
//! default. Range validation for the governor and scheduler numbers
//! lives in those crates, next to the state the numbers govern.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Environment variable pointing at an alternate config file.
pub const CONFIG_ENV: &str = "AUTOCAPTURE_CONFIG";

static DEFAULT_DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os("AUTOCAPTURE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".autocapture"))
});

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub app: AppSection,
    pub signals: SignalsSection,
    pub governor: GovernorSection,
    pub scheduler: SchedulerSection,
    pub logging: LoggingSection,
    pub control: ControlSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppSection {
    /// Root directory for runtime state (socket, logs).
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SignalsSection {
    /// Path of the activity-signal file written by the sidecar.
    pub path: PathBuf,
    /// Seconds after which a signal record counts as stale.
    pub max_staleness_s: f64,
    /// On stale/unavailable signals: `true` treats the user as away
    /// (heavy work may proceed), `false` treats the user as active.
    pub fail_open: bool,
}

impl Default for SignalsSection {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATA_DIR.join("activity.json"),
            max_staleness_s: 3.0,
            fail_open: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct GovernorSection {
    /// Idle seconds required before background drain may start.
    pub idle_window_s: f64,
    /// How long a heavy job may keep running after its admitting mode
    /// is no longer in force.
    pub preempt_grace_ms: u64,
    /// Upper bound on grace once a preemption is decided.
    pub suspend_deadline_ms: u64,
    /// Cumulative heavy milliseconds allowed per window.
    pub heavy_budget_ms_per_window: u64,
    pub budget_window_s: u64,
    /// Heavy jobs must poll their preemption handle at least this often.
    pub preempt_poll_ms: u64,
    /// Forces SAFE_MODE regardless of signals.
    pub safe_mode: bool,
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            idle_window_s: 30.0,
            preempt_grace_ms: 150,
            suspend_deadline_ms: 500,
            heavy_budget_ms_per_window: 60_000,
            budget_window_s: 300,
            preempt_poll_ms: 50,
            safe_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerSection {
    /// Upper bound on jobs started per tick.
    pub max_jobs_per_tick: usize,
    /// Worker slots for CPU-bound heavy jobs.
    pub cpu_worker_slots: usize,
    /// Worker slots for GPU-bound heavy jobs.
    pub gpu_worker_slots: usize,
    /// Estimate applied to heavy jobs that did not declare one.
    pub default_heavy_estimate_ms: u64,
    /// Conductor tick period.
    pub tick_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_jobs_per_tick: 8,
            cpu_worker_slots: 2,
            gpu_worker_slots: 1,
            default_heavy_estimate_ms: 5_000,
            tick_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingSection {
    /// Tracing filter, e.g. "info" or "governor=debug,info".
    pub level: String,
    /// Log file name under `app.data_dir/logs`.
    pub file: String,
    /// "text" or "json" for stdout; the file layer is always JSON.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: String::new(),
            file: "autocapture.log".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ControlSection {
    /// Unix socket the control server listens on.
    pub socket_path: PathBuf,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_DATA_DIR.join("control.sock"),
        }
    }
}

/// Load configuration from `path`, the `AUTOCAPTURE_CONFIG` file, or
/// defaults when neither exists. `.env` is honored for the variables
/// above.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let candidate = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let Some(file) = candidate else {
        return Ok(AppConfig::default());
    };

    let raw = fs::read_to_string(&file)
        .with_context(|| format!("read config file {}", file.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("parse config file {}", file.display()))?;
    Ok(cfg)
}
