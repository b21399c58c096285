pub mod ambient;
pub mod call_depth;
pub mod cancel;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod eval;
pub mod hooks;
pub mod host;
pub mod markers;
pub mod runtime_loop;
pub mod script_harness;
pub mod scripts;
pub mod telemetry;
pub mod time;
pub mod transfers;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use bevy_ecs::entity::Entity;
pub use call_depth::{CallDepthGuard, CallScope, DEFAULT_MAX_CALL_DEPTH};
pub use cancel::CancellationToken;
pub use config::{RuntimeConfig, RuntimeConfigOverrides};
pub use console::ConsoleBuffer;
pub use context::{BackgroundContext, ContextHandle, ContextId, ExecutionContext, ForegroundContext, YieldRequest};
pub use error::{ScriptError, ScriptResult};
pub use eval::{EvalOutcome, OneShotEvaluator};
pub use hooks::{ControlHook, ControlHookRegistry, ControlState, EntityTickSource, HookRef};
pub use host::EcsTickHost;
pub use runtime_loop::{ForegroundDriver, ScriptTask, TaskStatus};
pub use scripts::ScriptEngine;
pub use telemetry::TimeSeriesCollection;

/// Locks `mutex`, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
