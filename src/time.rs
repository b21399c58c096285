use std::fmt;
use std::time::{Duration, Instant};

use crate::error::ScriptError;

pub const DEFAULT_TICK_BUDGET: Duration = Duration::from_millis(100);

/// Callback armed to run exactly once at the start of the next slice.
pub type OneShot = Box<dyn FnOnce() + Send + 'static>;

/// Per-slice time allowance for foreground script execution.
///
/// The stopwatch only moves forward within a slice; [`TickBudget::reset`] is
/// the one place it restarts, and it drains the pending one-shot first.
pub struct TickBudget {
    started: Instant,
    budget: Duration,
    pending: Option<OneShot>,
}

impl TickBudget {
    pub fn new(budget: Duration) -> Self {
        Self { started: Instant::now(), budget, pending: None }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn check(&self) -> Result<(), ScriptError> {
        let elapsed = self.elapsed();
        if elapsed >= self.budget {
            return Err(ScriptError::BudgetExceeded { elapsed, budget: self.budget });
        }
        Ok(())
    }

    /// Arms `callback` for the next reset, replacing any callback still pending.
    pub fn arm_once(&mut self, callback: OneShot) {
        self.pending = Some(callback);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take_pending(&mut self) -> Option<OneShot> {
        self.pending.take()
    }

    pub fn restart(&mut self) {
        self.started = Instant::now();
    }

    /// Fires and clears the pending one-shot, then restarts the stopwatch.
    pub fn reset(&mut self) {
        if let Some(callback) = self.pending.take() {
            callback();
        }
        self.restart();
    }
}

impl Default for TickBudget {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_BUDGET)
    }
}

impl fmt::Debug for TickBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickBudget")
            .field("elapsed", &self.elapsed())
            .field("budget", &self.budget)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn zero_budget_trips_immediately() {
        let budget = TickBudget::new(Duration::ZERO);
        assert!(matches!(budget.check(), Err(ScriptError::BudgetExceeded { .. })));
    }

    #[test]
    fn reset_drains_pending_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut budget = TickBudget::default();
        let counter = Arc::clone(&fired);
        budget.arm_once(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        budget.reset();
        budget.reset();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!budget.has_pending());
    }

    #[test]
    fn remaining_never_underflows() {
        let budget = TickBudget::new(Duration::ZERO);
        assert_eq!(budget.remaining(), Duration::ZERO);
    }
}
