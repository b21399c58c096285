use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ScriptError;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 100;

/// Atomic nested-call counter shared by every thread executing inside one context.
///
/// `enter` increments even when it fails; the caller still owes the matching
/// `leave`. Prefer [`CallDepthGuard::scope`], which settles that debt on drop.
#[derive(Debug)]
pub struct CallDepthGuard {
    depth: AtomicUsize,
    max_depth: usize,
}

impl CallDepthGuard {
    pub fn new(max_depth: usize) -> Self {
        Self { depth: AtomicUsize::new(0), max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn enter(&self) -> Result<(), ScriptError> {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if depth > self.max_depth {
            return Err(ScriptError::ExecutionOverflow { max_depth: self.max_depth });
        }
        Ok(())
    }

    /// Decrements the counter, saturating at zero.
    pub fn leave(&self) {
        let previous =
            self.depth.fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| Some(depth.saturating_sub(1)));
        if previous == Ok(0) {
            log::warn!("[call-depth] unbalanced leave ignored");
        }
    }

    /// Enters a call and returns a guard that leaves it again when dropped.
    ///
    /// On overflow the increment is undone before the error is returned.
    pub fn scope(&self) -> Result<CallScope<'_>, ScriptError> {
        match self.enter() {
            Ok(()) => Ok(CallScope { guard: self }),
            Err(err) => {
                self.leave();
                Err(err)
            }
        }
    }
}

impl Default for CallDepthGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH)
    }
}

#[must_use = "dropping the scope immediately leaves the call"]
#[derive(Debug)]
pub struct CallScope<'a> {
    guard: &'a CallDepthGuard,
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.guard.leave();
    }
}
