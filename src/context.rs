//! Execution contexts: the unit of state script code runs inside.
//!
//! A [`ForegroundContext`] is driven by the host once per tick and enforces a
//! wall-clock budget. A [`BackgroundContext`] runs detached from the tick on
//! its own thread and only observes its cancellation token. Both enforce the
//! same call-depth limit and form an owned forest: every context owns the
//! background contexts it spawned and tears them down with itself.

mod background;
mod foreground;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

pub use background::BackgroundContext;
pub use foreground::ForegroundContext;

use crate::call_depth::{CallDepthGuard, CallScope};
use crate::cancel::CancellationToken;
use crate::console::ConsoleBuffer;
use crate::error::ScriptError;
use crate::telemetry::TimeSeriesCollection;

pub type ContextHandle = Arc<dyn ExecutionContext>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// What the host-level scheduler should wait for before resuming a suspended script.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum YieldRequest {
    /// Resume on the next fixed simulation step.
    #[default]
    NextTick,
    /// Skip the given number of fixed steps first.
    Ticks(u32),
    /// Resume once at least this much simulated time has passed.
    Delay(Duration),
}

/// Capability set every execution context provides.
pub trait ExecutionContext: Send + Sync {
    fn id(&self) -> ContextId;

    fn is_background(&self) -> bool;

    /// Cooperative suspension point. Script dispatchers call this periodically.
    fn check_budget(&self) -> Result<(), ScriptError>;

    /// Starts a new execution slice.
    fn reset_budget(&self);

    fn depth_guard(&self) -> &CallDepthGuard;

    /// Creates a background child owned by this context.
    fn spawn_background(&self, token: CancellationToken) -> Arc<BackgroundContext>;

    /// Recursive, idempotent teardown.
    fn cleanup(&self);

    fn console(&self) -> &ConsoleBuffer;

    fn telemetry(&self) -> Option<&TimeSeriesCollection> {
        None
    }

    fn enter_call(&self) -> Result<(), ScriptError> {
        self.depth_guard().enter()
    }

    fn leave_call(&self) {
        self.depth_guard().leave()
    }

    fn call_depth(&self) -> usize {
        self.depth_guard().depth()
    }

    /// Enters a call and leaves it again when the scope drops.
    fn call_scope(&self) -> Result<CallScope<'_>, ScriptError> {
        self.depth_guard().scope()
    }
}
