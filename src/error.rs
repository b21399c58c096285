//! Error types raised by script execution contexts.

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the execution-context core.
///
/// None of these ever terminate the host: budget and overflow errors are
/// caught at the script-dispatcher boundary, cancellation ends the background
/// computation that observed it, and evaluator errors are handed back to the
/// console caller as a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The foreground tick budget ran out. Suspend and resume next tick.
    #[error("tick budget exceeded: {}ms elapsed (budget {}ms)", .elapsed.as_millis(), .budget.as_millis())]
    BudgetExceeded { elapsed: Duration, budget: Duration },

    /// Nested call depth went past the configured maximum.
    #[error("call depth exceeded maximum of {max_depth}")]
    ExecutionOverflow { max_depth: usize },

    /// The owning background context was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// The bounded evaluator gave up on a value that never resolved.
    #[error("no result after {polls} polls")]
    NoResult { polls: usize },

    /// Compile or runtime failure reported by the script dispatcher.
    #[error("script error: {0}")]
    Script(String),
}

impl ScriptError {
    /// `true` for errors that mean "yield now, resume next tick".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ScriptError::BudgetExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScriptError::Cancelled)
    }

    pub fn script(message: impl Into<String>) -> Self {
        ScriptError::Script(message.into())
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
