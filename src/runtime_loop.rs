//! Fixed-step driver for the foreground context.
//!
//! The host feeds elapsed frame time to [`ForegroundDriver::advance`], which
//! runs every fixed step that became due and then renders markers once. Each
//! step gives the script tasks a fresh budget slice (with the context bound as
//! ambient), then a second fresh slice for the control hooks fired by the host.
//! A task that runs out of budget is suspended and retried next step, up to
//! `max_task_retries` overruns in a row.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use rhai::Dynamic;

use crate::ambient;
use crate::config::ContextConfig;
use crate::context::{ExecutionContext, ForegroundContext, YieldRequest};
use crate::error::ScriptError;
use crate::host::EcsTickHost;

/// How a task left its slice.
#[derive(Clone, Debug)]
pub enum TaskStatus {
    Yielded(YieldRequest),
    Completed(Dynamic),
}

/// Resumable unit of foreground script work.
///
/// A resume that fails with [`ScriptError::BudgetExceeded`] is not continued
/// where it stopped: the next step calls `resume` again from the top, so any
/// side effects before the overrun (console output, telemetry samples) happen
/// again. The driver aborts a task after too many overruns in a row.
pub trait ScriptTask: Send {
    fn name(&self) -> &str;

    fn resume(&mut self, ctx: &ForegroundContext, dt: f32) -> Result<TaskStatus, ScriptError>;
}

/// Accumulates host frame time into fixed steps, dropping backlog past a cap.
struct StepAccumulator {
    pending: f32,
    fixed_dt: f32,
    max_backlog: f32,
}

impl StepAccumulator {
    fn new(fixed_dt: f32, max_backlog: f32) -> Self {
        Self { pending: 0.0, fixed_dt, max_backlog: max_backlog.max(fixed_dt) }
    }

    /// Adds `elapsed` seconds and returns how much was dropped, if any.
    fn push(&mut self, elapsed: f32) -> Option<f32> {
        self.pending += elapsed.max(0.0);
        let over = self.pending - self.max_backlog;
        if over > 0.0 {
            self.pending = self.max_backlog;
            return Some(over);
        }
        None
    }

    fn pop(&mut self) -> Option<f32> {
        if self.pending < self.fixed_dt {
            return None;
        }
        self.pending -= self.fixed_dt;
        Some(self.fixed_dt)
    }
}

enum Wait {
    Ready,
    Ticks(u32),
    Until(Duration),
}

struct TaskSlot {
    task: Box<dyn ScriptTask>,
    wait: Wait,
    overruns: u32,
}

impl TaskSlot {
    fn is_due(&mut self, now: Duration) -> bool {
        match &mut self.wait {
            Wait::Ready => true,
            Wait::Ticks(0) => true,
            Wait::Ticks(remaining) => {
                *remaining -= 1;
                false
            }
            Wait::Until(at) => now >= *at,
        }
    }

    fn wait_for(&mut self, request: YieldRequest, now: Duration) {
        self.wait = match request {
            YieldRequest::NextTick => Wait::Ready,
            YieldRequest::Ticks(ticks) => Wait::Ticks(ticks),
            YieldRequest::Delay(delay) => Wait::Until(now + delay),
        };
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    pub resumed: usize,
    pub suspended: usize,
    pub completed: usize,
    pub aborted: usize,
    pub hooks_fired: usize,
}

pub struct ForegroundDriver {
    context: Arc<ForegroundContext>,
    host: Arc<EcsTickHost>,
    accumulator: StepAccumulator,
    max_task_retries: u32,
    tasks: Vec<TaskSlot>,
    sim_time: Duration,
    results: Vec<(String, Dynamic)>,
}

impl ForegroundDriver {
    pub fn new(config: &ContextConfig, context: Arc<ForegroundContext>, host: Arc<EcsTickHost>) -> Self {
        Self {
            context,
            host,
            accumulator: StepAccumulator::new(config.fixed_dt, config.max_backlog),
            max_task_retries: config.max_task_retries,
            tasks: Vec::new(),
            sim_time: Duration::ZERO,
            results: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<ForegroundContext> {
        &self.context
    }

    pub fn host(&self) -> &Arc<EcsTickHost> {
        &self.host
    }

    pub fn spawn_task(&mut self, task: Box<dyn ScriptTask>) {
        log::debug!("[driver] task '{}' scheduled", task.name());
        self.tasks.push(TaskSlot { task, wait: Wait::Ready, overruns: 0 });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn sim_time(&self) -> Duration {
        self.sim_time
    }

    /// Values returned by finished tasks, oldest first.
    pub fn take_results(&mut self) -> Vec<(String, Dynamic)> {
        mem::take(&mut self.results)
    }

    /// Feeds `elapsed` seconds of host frame time and runs every fixed step
    /// that became due. Markers render once per frame that stepped.
    pub fn advance(&mut self, elapsed: f32) -> Vec<StepReport> {
        if let Some(dropped) = self.accumulator.push(elapsed) {
            log::debug!("[driver] dropped {dropped:.3}s of backlog");
        }
        let mut reports = Vec::new();
        while let Some(dt) = self.accumulator.pop() {
            reports.push(self.step(dt));
        }
        if !reports.is_empty() {
            self.context.trigger_marker_render();
        }
        reports
    }

    /// Runs one fixed simulation step of length `dt`.
    pub fn step(&mut self, dt: f32) -> StepReport {
        let mut report = StepReport::default();
        self.context.reset_budget();
        self.sim_time += Duration::from_secs_f32(dt);
        let now = self.sim_time;
        {
            let _ambient = self.context.handle().map(ambient::bind);
            let mut remaining = Vec::with_capacity(self.tasks.len());
            for mut slot in mem::take(&mut self.tasks) {
                if !slot.is_due(now) {
                    remaining.push(slot);
                    continue;
                }
                report.resumed += 1;
                match slot.task.resume(&self.context, dt) {
                    Ok(TaskStatus::Yielded(request)) => {
                        slot.overruns = 0;
                        slot.wait_for(request, now);
                        remaining.push(slot);
                    }
                    Ok(TaskStatus::Completed(value)) => {
                        report.completed += 1;
                        self.results.push((slot.task.name().to_string(), value));
                    }
                    Err(err) if err.is_recoverable() && slot.overruns < self.max_task_retries => {
                        slot.overruns += 1;
                        log::debug!("[driver] task '{}' suspended ({}): {err}", slot.task.name(), slot.overruns);
                        report.suspended += 1;
                        slot.wait = Wait::Ready;
                        remaining.push(slot);
                    }
                    Err(ScriptError::Cancelled) => {
                        log::debug!("[driver] task '{}' cancelled", slot.task.name());
                    }
                    Err(err) => {
                        report.aborted += 1;
                        let name = slot.task.name();
                        if err.is_recoverable() {
                            log::warn!("[driver] task '{name}' aborted after {} overruns: {err}", slot.overruns + 1);
                            self.context
                                .console()
                                .error(&format!("{name}: gave up after {} budget overruns", slot.overruns + 1));
                        } else {
                            log::warn!("[driver] task '{name}' aborted: {err}");
                            self.context.console().error(&format!("{name}: {err}"));
                        }
                    }
                }
            }
            self.tasks = remaining;
            self.context.trigger_marker_update();
        }
        // Hooks get their own slice so a long task cannot starve them.
        self.context.reset_budget();
        report.hooks_fired = self.host.step(dt);
        report
    }
}
