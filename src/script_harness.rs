use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::console::{ConsoleBuffer, ConsoleKind};
use crate::context::{ExecutionContext, ForegroundContext};
use crate::hooks::{ControlState, HookRef};
use crate::host::EcsTickHost;
use crate::runtime_loop::ForegroundDriver;
use crate::scripts::ScriptEngine;
use crate::telemetry::TimeSeriesCollection;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    /// Path to the Rhai control script. Ignored when `source` is set.
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_dt")]
    pub dt: f32,
    #[serde(default)]
    pub tick_budget_ms: Option<u64>,
    #[serde(default)]
    pub bodies: Vec<FixtureBody>,
    /// Script functions run once per step as foreground tasks.
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureBody {
    pub name: String,
    #[serde(default)]
    pub hooks: Vec<String>,
    /// Step after which every hook on this body is detached.
    #[serde(default)]
    pub detach_after: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub steps: usize,
    pub dt: f32,
    pub bodies: Vec<String>,
    pub results: Vec<StepResult>,
    pub completed_tasks: Vec<String>,
    pub telemetry: Vec<SeriesSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub console: Vec<String>,
    pub hooks_fired: usize,
    pub controls: Vec<BodyControls>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyControls {
    pub name: String,
    pub throttle: f32,
    pub rotation: [f32; 3],
    pub translation: [f32; 3],
    pub wheel_throttle: f32,
    pub wheel_steer: f32,
    pub brakes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesSummary {
    pub name: String,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_range: Option<[f64; 2]>,
}

fn default_steps() -> usize {
    1
}

fn default_dt() -> f32 {
    1.0 / 50.0
}

impl BodyControls {
    fn new(name: &str, state: ControlState) -> Self {
        Self {
            name: name.to_string(),
            throttle: state.throttle,
            rotation: state.rotation.to_array(),
            translation: state.translation.to_array(),
            wheel_throttle: state.wheel_throttle,
            wheel_steer: state.wheel_steer,
            brakes: state.brakes,
        }
    }
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    run_fixture_with_config(fixture, &RuntimeConfig::default())
}

/// Runs `fixture` on top of `base`. The fixture's own budget wins over the
/// config's, and each frame of `dt` seconds advances exactly one fixed step.
pub fn run_fixture_with_config(fixture: &HarnessFixture, base: &RuntimeConfig) -> Result<HarnessOutput> {
    if fixture.dt.is_nan() || fixture.dt <= 0.0 {
        bail!("fixture dt must be positive, got {}", fixture.dt);
    }
    let mut config = base.clone();
    if let Some(budget) = fixture.tick_budget_ms {
        config.context.tick_budget_ms = budget;
    }
    config.context.fixed_dt = fixture.dt;
    let engine = Arc::new(ScriptEngine::new(&config));
    let ast = match (&fixture.source, &fixture.script) {
        (Some(source), _) => engine.compile(source).map_err(|err| anyhow::anyhow!("compiling inline source: {err}"))?,
        (None, Some(path)) => engine.compile_file(path)?,
        (None, None) => bail!("fixture needs either `script` or `source`"),
    };
    let ast = Arc::new(ast);

    let host = Arc::new(EcsTickHost::new());
    let console = ConsoleBuffer::new(config.console.capacity);
    let telemetry = TimeSeriesCollection::new();
    let context = ForegroundContext::new(&config.context, host.clone(), console.clone(), telemetry.clone());

    let mut bodies = Vec::with_capacity(fixture.bodies.len());
    for body in &fixture.bodies {
        let entity = host.spawn_body(&body.name);
        for function in &body.hooks {
            if !ast.iter_functions().any(|f| f.name == function.as_str() && f.params.len() == 1) {
                bail!("body '{}' hooks '{function}', which is not a one-argument script function", body.name);
            }
            let hook: HookRef = Arc::new(engine.control_hook(Arc::clone(&ast), function));
            context.hook(entity, hook);
        }
        bodies.push((body, entity));
    }

    let mut driver = ForegroundDriver::new(&config.context, Arc::clone(&context), Arc::clone(&host));
    for function in &fixture.tasks {
        driver.spawn_task(Box::new(engine.task(Arc::clone(&ast), function)));
    }

    let mut results = Vec::with_capacity(fixture.steps);
    let mut completed_tasks = Vec::new();
    for step in 0..fixture.steps {
        let hooks_fired: usize = driver.advance(fixture.dt).iter().map(|report| report.hooks_fired).sum();
        for (body, entity) in &bodies {
            if body.detach_after == Some(step) {
                context.unhook_all(*entity);
            }
        }
        completed_tasks.extend(driver.take_results().into_iter().map(|(name, value)| format!("{name}: {value}")));
        let console_lines: Vec<String> = console
            .drain()
            .into_iter()
            .map(|line| match line.kind {
                ConsoleKind::Output => line.text,
                ConsoleKind::Error => format!("error: {}", line.text),
            })
            .collect();
        let controls: Vec<BodyControls> = bodies
            .iter()
            .filter_map(|(body, entity)| host.state(*entity).map(|state| BodyControls::new(&body.name, state)))
            .collect();
        results.push(StepResult { step, console: console_lines, hooks_fired, controls });
    }

    let telemetry: Vec<SeriesSummary> = telemetry
        .snapshot()
        .into_iter()
        .map(|series| SeriesSummary {
            samples: series.len(),
            value_range: series.value_range().map(|(min, max)| [min, max]),
            name: series.name,
        })
        .collect();

    drop(driver);
    context.cleanup();

    Ok(HarnessOutput {
        steps: fixture.steps,
        dt: fixture.dt,
        bodies: fixture.bodies.iter().map(|body| body.name.clone()).collect(),
        results,
        completed_tasks,
        telemetry,
    })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fixture '{}'", path.display()))?;
    let mut fixture: HarnessFixture = serde_json::from_reader(file).with_context(|| "parsing fixture JSON")?;
    // Script paths are relative to the fixture file.
    if let (Some(script), Some(parent)) = (&fixture.script, path.parent()) {
        let candidate = parent.join(script);
        if fixture.source.is_none() && candidate.exists() {
            fixture.source = Some(
                fs::read_to_string(&candidate)
                    .with_context(|| format!("reading script '{}'", candidate.display()))?,
            );
        }
    }
    Ok(fixture)
}
