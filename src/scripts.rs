use std::any::Any;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::task::Poll;

use anyhow::{Context, Result};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST, FLOAT, INT};

use crate::ambient;
use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, ForegroundContext};
use crate::error::ScriptError;
use crate::eval::{EvalOutcome, OneShotEvaluator, PendingValue, ProgramItem};
use crate::hooks::{ControlHook, ControlState};
use crate::lock;
use crate::runtime_loop::{ScriptTask, TaskStatus};

/// Rhai engine wired to the execution-context core.
///
/// Every `progress_check_interval` operations the engine calls
/// `check_budget` on the ambient context and terminates the call if it fails.
/// The call-level limit mirrors the context's call-depth limit, and `print`
/// goes to the ambient context's console.
pub struct ScriptEngine {
    engine: Engine,
    max_call_depth: usize,
}

impl ScriptEngine {
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        engine.set_max_call_levels(config.context.max_call_depth);
        if config.scripts.max_operations > 0 {
            engine.set_max_operations(config.scripts.max_operations);
        }
        let interval = config.scripts.progress_check_interval.max(1);
        engine.on_progress(move |operations| {
            if operations % interval != 0 {
                return None;
            }
            match ambient::with_current(|ctx| ctx.check_budget()) {
                Some(Err(err)) => Some(Dynamic::from(err)),
                _ => None,
            }
        });
        engine.on_print(|text| {
            if ambient::with_current(|ctx| ctx.console().print_line(text)).is_none() {
                log::info!("[script] {text}");
            }
        });
        engine.on_debug(|text, source, pos| {
            log::debug!("[script:{}] {pos:?} {text}", source.unwrap_or("<inline>"));
        });
        register_api(&mut engine);
        Self { engine, max_call_depth: config.context.max_call_depth }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn compile(&self, source: &str) -> Result<AST, ScriptError> {
        self.engine.compile(source).map_err(|err| ScriptError::script(err.to_string()))
    }

    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<AST> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let ast = self.engine.compile(source).with_context(|| format!("Compiling Rhai script {}", path.display()))?;
        Ok(ast)
    }

    /// Translates a Rhai failure into the core's error kinds.
    pub fn map_error(&self, err: Box<EvalAltResult>) -> ScriptError {
        match *err {
            EvalAltResult::ErrorStackOverflow(_) => ScriptError::ExecutionOverflow { max_depth: self.max_call_depth },
            EvalAltResult::ErrorTerminated(token, _) => {
                token.try_cast::<ScriptError>().unwrap_or_else(|| ScriptError::script("script terminated"))
            }
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => self.map_error(inner),
            other => ScriptError::Script(other.to_string()),
        }
    }

    /// Builds a control hook that calls `function(dt)` with the control state bound to `this`.
    pub fn control_hook(self: &Arc<Self>, ast: Arc<AST>, function: &str) -> ScriptControlHook {
        ScriptControlHook {
            engine: Arc::clone(self),
            ast,
            function: function.to_string(),
            label: format!("script:{function}"),
            scope: Mutex::new(Scope::new()),
        }
    }

    /// Builds a per-tick task that calls `function(dt)` until it returns a non-unit value.
    pub fn task(self: &Arc<Self>, ast: Arc<AST>, function: &str) -> ScriptTickTask {
        ScriptTickTask { engine: Arc::clone(self), ast, function: function.to_string(), scope: Scope::new() }
    }

    pub fn repl_items(self: &Arc<Self>, source: &str) -> Result<Vec<Box<dyn ProgramItem>>, ScriptError> {
        let ast = self.compile(source)?;
        let mut items: Vec<Box<dyn ProgramItem>> = Vec::new();
        let functions = ast.clone_functions_only();
        if functions.iter_functions().next().is_some() {
            items.push(Box::new(ScriptItem { engine: Arc::clone(self), ast: functions, declaration: true }));
        }
        items.push(Box::new(ScriptItem { engine: Arc::clone(self), ast, declaration: false }));
        Ok(items)
    }

    /// Compiles and evaluates a console line; errors come back as a value.
    pub fn eval_repl(self: &Arc<Self>, evaluator: &OneShotEvaluator, source: &str) -> EvalOutcome {
        let items = self.repl_items(source)?;
        evaluator.evaluate(&items)
    }

    fn call(&self, scope: &mut Scope<'static>, ast: &AST, function: &str, this: Option<&mut Dynamic>, dt: f32) -> EvalOutcome {
        let mut options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        if let Some(this) = this {
            options = options.bind_this_ptr(this);
        }
        self.engine
            .call_fn_with_options::<Dynamic>(options, scope, ast, function, (dt as FLOAT,))
            .map_err(|err| self.map_error(err))
    }
}

pub struct ScriptControlHook {
    engine: Arc<ScriptEngine>,
    ast: Arc<AST>,
    function: String,
    label: String,
    scope: Mutex<Scope<'static>>,
}

impl ScriptControlHook {
    pub fn function(&self) -> &str {
        &self.function
    }
}

impl ControlHook for ScriptControlHook {
    fn label(&self) -> &str {
        &self.label
    }

    fn update(&self, ctx: &dyn ExecutionContext, state: &mut ControlState, dt: f32) -> Result<(), ScriptError> {
        let _call = ctx.call_scope()?;
        let mut this = Dynamic::from(*state);
        {
            let mut scope = lock(&self.scope);
            let _returned = self.engine.call(&mut scope, &self.ast, &self.function, Some(&mut this), dt)?;
        }
        match this.try_cast::<ControlState>() {
            Some(updated) => {
                *state = updated;
                Ok(())
            }
            None => Err(ScriptError::script(format!("{} replaced `this` with a non-control value", self.label))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Foreground task backed by a script function called once per resume.
pub struct ScriptTickTask {
    engine: Arc<ScriptEngine>,
    ast: Arc<AST>,
    function: String,
    scope: Scope<'static>,
}

impl ScriptTask for ScriptTickTask {
    fn name(&self) -> &str {
        &self.function
    }

    fn resume(&mut self, ctx: &ForegroundContext, dt: f32) -> Result<TaskStatus, ScriptError> {
        let _call = ctx.call_scope()?;
        let value = self.engine.call(&mut self.scope, &self.ast, &self.function, None, dt)?;
        if value.is_unit() {
            Ok(TaskStatus::Yielded(ctx.take_next_yield()))
        } else {
            Ok(TaskStatus::Completed(value))
        }
    }
}

/// Console program item wrapping compiled Rhai source.
pub struct ScriptItem {
    engine: Arc<ScriptEngine>,
    ast: AST,
    declaration: bool,
}

struct ScriptEvaluation<'a> {
    item: &'a ScriptItem,
    done: bool,
}

impl ProgramItem for ScriptItem {
    fn is_declaration(&self) -> bool {
        self.declaration
    }

    fn start(&self, _ctx: &ForegroundContext) -> Box<dyn PendingValue + '_> {
        Box::new(ScriptEvaluation { item: self, done: false })
    }
}

impl PendingValue for ScriptEvaluation<'_> {
    fn poll_value(&mut self, ctx: &ForegroundContext) -> Poll<EvalOutcome> {
        if self.done {
            return Poll::Ready(Err(ScriptError::script("evaluation already finished")));
        }
        self.done = true;
        let outcome = ctx.call_scope().and_then(|_call| {
            let mut scope = Scope::new();
            self.item
                .engine
                .engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, &self.item.ast)
                .map_err(|err| self.item.engine.map_error(err))
        });
        Poll::Ready(outcome)
    }
}

fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<ControlState>("ControlState");
    engine.register_get_set(
        "throttle",
        |s: &mut ControlState| s.throttle as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.throttle = v as f32,
    );
    engine.register_get_set(
        "pitch",
        |s: &mut ControlState| s.rotation.x as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.rotation.x = v as f32,
    );
    engine.register_get_set(
        "yaw",
        |s: &mut ControlState| s.rotation.y as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.rotation.y = v as f32,
    );
    engine.register_get_set(
        "roll",
        |s: &mut ControlState| s.rotation.z as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.rotation.z = v as f32,
    );
    engine.register_get_set(
        "fore",
        |s: &mut ControlState| s.translation.x as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.translation.x = v as f32,
    );
    engine.register_get_set(
        "lateral",
        |s: &mut ControlState| s.translation.y as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.translation.y = v as f32,
    );
    engine.register_get_set(
        "vertical",
        |s: &mut ControlState| s.translation.z as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.translation.z = v as f32,
    );
    engine.register_get_set(
        "wheel_throttle",
        |s: &mut ControlState| s.wheel_throttle as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.wheel_throttle = v as f32,
    );
    engine.register_get_set(
        "wheel_steer",
        |s: &mut ControlState| s.wheel_steer as FLOAT,
        |s: &mut ControlState, v: FLOAT| s.wheel_steer = v as f32,
    );
    engine.register_get_set("brakes", |s: &mut ControlState| s.brakes, |s: &mut ControlState, v: bool| s.brakes = v);

    engine.register_fn("record", |name: &str, time: FLOAT, value: FLOAT| -> bool {
        ambient::with_current(|ctx| ctx.telemetry().map(|series| series.record(name, time, value)).unwrap_or(false))
            .unwrap_or(false)
    });
    engine.register_fn("call_depth", || -> INT {
        ambient::with_current(|ctx| ctx.call_depth() as INT).unwrap_or(0)
    });
    engine.register_fn("is_background", || -> bool {
        ambient::with_current(|ctx| ctx.is_background()).unwrap_or(false)
    });
}
