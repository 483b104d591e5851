//! Rolling heavy-work budget. Realized as a fixed window with lazy
//! reset: once `budget_window` has elapsed since the window opened, the
//! spent counter clears on the next touch. The window only tracks
//! charged milliseconds; outstanding-lease accrual is computed by the
//! caller from the lease table and passed in, so there is a single
//! source of truth for live grants.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) struct BudgetWindow {
    cap_ms: u64,
    window: Duration,
    window_start: Instant,
    spent_ms: u64,
}

/// The spent counter would wrap. Treated by the caller as a fatal
/// accounting breach.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BudgetOverflow;

impl BudgetWindow {
    pub(crate) fn new(cap_ms: u64, window: Duration, now: Instant) -> Self {
        Self {
            cap_ms,
            window,
            window_start: now,
            spent_ms: 0,
        }
    }

    /// Clear the spent counter when the window has lapsed.
    pub(crate) fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.window {
            self.spent_ms = 0;
            self.window_start = now;
        }
    }

    /// Remaining milliseconds once `outstanding_ms` (full reservations
    /// for admission, elapsed accrual for decisions) is counted.
    /// Floors at zero; a rogue overrun may push spent past the cap.
    pub(crate) fn remaining_after(&self, outstanding_ms: u64) -> u64 {
        self.cap_ms
            .saturating_sub(self.spent_ms.saturating_add(outstanding_ms))
    }

    /// Charge actual elapsed milliseconds at lease release.
    pub(crate) fn charge(&mut self, ms: u64) -> Result<(), BudgetOverflow> {
        match self.spent_ms.checked_add(ms) {
            Some(total) => {
                self.spent_ms = total;
                Ok(())
            }
            None => Err(BudgetOverflow),
        }
    }

    pub(crate) fn set_cap(&mut self, cap_ms: u64) {
        self.cap_ms = cap_ms;
    }

    pub(crate) fn set_window(&mut self, window: Duration) {
        self.window = window;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_work_reduces_remaining() {
        let now = Instant::now();
        let mut budget = BudgetWindow::new(1_000, Duration::from_secs(300), now);
        assert_eq!(budget.remaining_after(400), 600);
        budget.charge(250).unwrap();
        assert_eq!(budget.remaining_after(0), 750);
        assert_eq!(budget.remaining_after(800), 0);
    }

    #[test]
    fn remaining_floors_at_zero_after_overrun_charge() {
        let now = Instant::now();
        let mut budget = BudgetWindow::new(1_000, Duration::from_secs(300), now);
        budget.charge(2_400).unwrap();
        assert_eq!(budget.remaining_after(0), 0);
    }

    #[test]
    fn window_roll_clears_spent() {
        let now = Instant::now();
        let mut budget = BudgetWindow::new(1_000, Duration::from_secs(300), now);
        budget.charge(900).unwrap();

        budget.roll(now + Duration::from_secs(299));
        assert_eq!(budget.remaining_after(0), 100);

        budget.roll(now + Duration::from_secs(300));
        assert_eq!(budget.remaining_after(0), 1_000);
    }

    #[test]
    fn charge_overflow_is_reported_not_wrapped() {
        let now = Instant::now();
        let mut budget = BudgetWindow::new(1_000, Duration::from_secs(300), now);
        budget.charge(u64::MAX).unwrap();
        assert_eq!(budget.charge(1), Err(BudgetOverflow));
    }
}
