use std::time::Duration;

use core_types::config::GovernorSection;
use thiserror::Error;

/// Validated runtime configuration. Built from the file-backed section;
/// an invalid section never replaces a running config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorConfig {
    pub idle_window: Duration,
    pub preempt_grace: Duration,
    pub suspend_deadline: Duration,
    pub heavy_budget_ms_per_window: u64,
    pub budget_window: Duration,
    pub preempt_poll: Duration,
    pub safe_mode: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("idle_window_s must be a finite, non-negative number")]
    InvalidIdleWindow,
    #[error("budget_window_s must be positive")]
    ZeroBudgetWindow,
    #[error("preempt_poll_ms must be positive")]
    ZeroPreemptPoll,
    #[error("suspend_deadline_ms must be at least preempt_poll_ms")]
    DeadlineBelowPoll,
}

impl GovernorConfig {
    pub fn from_section(section: &GovernorSection) -> Result<Self, ConfigError> {
        if !section.idle_window_s.is_finite() || section.idle_window_s < 0.0 {
            return Err(ConfigError::InvalidIdleWindow);
        }
        if section.budget_window_s == 0 {
            return Err(ConfigError::ZeroBudgetWindow);
        }
        if section.preempt_poll_ms == 0 {
            return Err(ConfigError::ZeroPreemptPoll);
        }
        if section.suspend_deadline_ms > 0 && section.suspend_deadline_ms < section.preempt_poll_ms
        {
            return Err(ConfigError::DeadlineBelowPoll);
        }

        Ok(Self {
            idle_window: Duration::from_secs_f64(section.idle_window_s),
            preempt_grace: Duration::from_millis(section.preempt_grace_ms),
            suspend_deadline: Duration::from_millis(section.suspend_deadline_ms),
            heavy_budget_ms_per_window: section.heavy_budget_ms_per_window,
            budget_window: Duration::from_secs(section.budget_window_s),
            preempt_poll: Duration::from_millis(section.preempt_poll_ms),
            safe_mode: section.safe_mode,
        })
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(30),
            preempt_grace: Duration::from_millis(150),
            suspend_deadline: Duration::from_millis(500),
            heavy_budget_ms_per_window: 60_000,
            budget_window: Duration::from_secs(300),
            preempt_poll: Duration::from_millis(50),
            safe_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = GovernorConfig::default();
        assert_eq!(cfg.idle_window, Duration::from_secs(30));
        assert_eq!(cfg.preempt_grace, Duration::from_millis(150));
        assert_eq!(cfg.suspend_deadline, Duration::from_millis(500));
        assert_eq!(cfg.heavy_budget_ms_per_window, 60_000);
        assert_eq!(cfg.budget_window, Duration::from_secs(300));
    }

    #[test]
    fn zero_budget_window_rejected() {
        let section = GovernorSection {
            budget_window_s: 0,
            ..GovernorSection::default()
        };
        assert_eq!(
            GovernorConfig::from_section(&section),
            Err(ConfigError::ZeroBudgetWindow)
        );
    }

    #[test]
    fn negative_idle_window_rejected() {
        let section = GovernorSection {
            idle_window_s: -1.0,
            ..GovernorSection::default()
        };
        assert_eq!(
            GovernorConfig::from_section(&section),
            Err(ConfigError::InvalidIdleWindow)
        );
    }

    #[test]
    fn deadline_must_cover_one_poll() {
        let section = GovernorSection {
            suspend_deadline_ms: 20,
            preempt_poll_ms: 50,
            ..GovernorSection::default()
        };
        assert_eq!(
            GovernorConfig::from_section(&section),
            Err(ConfigError::DeadlineBelowPoll)
        );
    }
}
