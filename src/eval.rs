//! Bounded one-shot evaluation for console callers.
//!
//! This path runs outside the host's tick cadence: instead of yielding every
//! tick it polls each item in a tight loop, sharing a single poll allowance
//! across the whole program. Each poll starts a fresh budget slice.

use std::sync::Arc;
use std::task::Poll;

use rhai::Dynamic;

use crate::ambient;
use crate::config::ContextConfig;
use crate::console::ConsoleBuffer;
use crate::context::{ContextHandle, ExecutionContext, ForegroundContext};
use crate::error::ScriptError;
use crate::hooks::EntityTickSource;
use crate::telemetry::TimeSeriesCollection;

/// Tagged result handed back to console callers; errors never propagate past it.
pub type EvalOutcome = Result<Dynamic, ScriptError>;

/// A computation that may need several polls to produce its value.
pub trait PendingValue: Send {
    fn poll_value(&mut self, ctx: &ForegroundContext) -> Poll<EvalOutcome>;
}

/// One top-level item of a pre-parsed program.
pub trait ProgramItem: Send + Sync {
    /// Declarations are evaluated before any statement, and their values are discarded.
    fn is_declaration(&self) -> bool {
        false
    }

    fn start(&self, ctx: &ForegroundContext) -> Box<dyn PendingValue + '_>;
}

/// Value that is already known; resolves on its first poll.
pub struct Ready(Option<EvalOutcome>);

impl Ready {
    pub fn new(outcome: EvalOutcome) -> Self {
        Self(Some(outcome))
    }
}

impl PendingValue for Ready {
    fn poll_value(&mut self, _ctx: &ForegroundContext) -> Poll<EvalOutcome> {
        match self.0.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Ready(Err(ScriptError::script("value already taken"))),
        }
    }
}

pub struct OneShotEvaluator {
    config: ContextConfig,
    host: Arc<dyn EntityTickSource>,
    console: ConsoleBuffer,
    telemetry: TimeSeriesCollection,
}

impl OneShotEvaluator {
    pub fn new(
        config: ContextConfig,
        host: Arc<dyn EntityTickSource>,
        console: ConsoleBuffer,
        telemetry: TimeSeriesCollection,
    ) -> Self {
        Self { config, host, console, telemetry }
    }

    pub fn max_polls(&self) -> usize {
        self.config.max_eval_polls
    }

    /// Evaluates `items` to completion inside a scratch foreground context.
    ///
    /// Returns the value of the last statement item, or unit if there is none.
    /// The scratch context is cleaned up before returning, so hooks or markers
    /// created during evaluation do not outlive it.
    pub fn evaluate(&self, items: &[Box<dyn ProgramItem>]) -> EvalOutcome {
        let context = ForegroundContext::new(
            &self.config,
            Arc::clone(&self.host),
            self.console.clone(),
            self.telemetry.clone(),
        );
        let outcome = {
            let _ambient = ambient::bind(Arc::clone(&context) as ContextHandle);
            let mut polls = 0;
            self.evaluate_in(&context, items, &mut polls)
        };
        context.cleanup();
        if let Err(err) = &outcome {
            log::debug!("[eval] evaluation failed: {err}");
        }
        outcome
    }

    fn evaluate_in(&self, ctx: &ForegroundContext, items: &[Box<dyn ProgramItem>], polls: &mut usize) -> EvalOutcome {
        for item in items.iter().filter(|item| item.is_declaration()) {
            let _declared = self.drive(ctx, item.as_ref(), polls)?;
        }
        let mut last = Dynamic::UNIT;
        for item in items.iter().filter(|item| !item.is_declaration()) {
            last = self.drive(ctx, item.as_ref(), polls)?;
        }
        Ok(last)
    }

    fn drive(&self, ctx: &ForegroundContext, item: &dyn ProgramItem, polls: &mut usize) -> EvalOutcome {
        let mut pending = item.start(ctx);
        loop {
            if *polls >= self.config.max_eval_polls {
                return Err(ScriptError::NoResult { polls: *polls });
            }
            *polls += 1;
            ctx.reset_budget();
            if let Poll::Ready(outcome) = pending.poll_value(ctx) {
                return outcome;
            }
        }
    }
}
