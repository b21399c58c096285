use std::env;
use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use kestrel_script_runtime::script_harness::{load_fixture, run_fixture_with_config, HarnessOutput};
use kestrel_script_runtime::{RuntimeConfig, RuntimeConfigOverrides};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(err) = run_cli() {
        log::error!("[script-harness] {err:?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let opts = parse_args()?;
    let mut fixture = load_fixture(&opts.fixture)?;
    if let Some(steps) = opts.steps {
        fixture.steps = steps;
    }
    let mut config = opts.config.as_ref().map(RuntimeConfig::load_or_default).unwrap_or_default();
    let overrides = RuntimeConfigOverrides {
        tick_budget_ms: opts.budget_ms,
        max_call_depth: opts.max_call_depth,
        ..Default::default()
    };
    if !overrides.is_empty() {
        log::info!("[script-harness] CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
        // The command line beats the fixture's own budget.
        if overrides.tick_budget_ms.is_some() {
            fixture.tick_budget_ms = None;
        }
    }
    let output = run_fixture_with_config(&fixture, &config)?;
    let fired: usize = output.results.iter().map(|step| step.hooks_fired).sum();
    log::info!(
        "[script-harness] {} steps, {} bodies, {fired} hook dispatches",
        output.steps,
        output.bodies.len()
    );

    if let Some(path) = &opts.write_output {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory '{}'", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).with_context(|| "serializing harness output")?;
        log::info!("[script-harness] wrote {}", path.display());
    }

    match &opts.check_golden {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
            let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
            if expected != output {
                bail!(
                    "golden mismatch for {} (use --write-output to refresh):\nexpected: {}\nactual:   {}",
                    opts.fixture.display(),
                    serde_json::to_string(&expected).unwrap_or_default(),
                    serde_json::to_string(&output).unwrap_or_default(),
                );
            }
            log::info!("[script-harness] matched golden {}", path.display());
        }
        None if opts.write_output.is_none() => {
            serde_json::to_writer_pretty(std::io::stdout(), &output)?;
            println!();
        }
        None => {}
    }
    Ok(())
}

struct CliOptions {
    fixture: PathBuf,
    write_output: Option<PathBuf>,
    check_golden: Option<PathBuf>,
    config: Option<PathBuf>,
    steps: Option<usize>,
    budget_ms: Option<u64>,
    max_call_depth: Option<usize>,
}

fn parse_args() -> Result<CliOptions> {
    let mut fixture = None;
    let mut write_output = None;
    let mut check_golden = None;
    let mut steps = None;
    let mut config = None;
    let mut budget_ms = None;
    let mut max_call_depth = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture" | "-f" => fixture = args.next().map(PathBuf::from),
            "--write-output" | "-o" => write_output = args.next().map(PathBuf::from),
            "--golden" | "-g" => check_golden = args.next().map(PathBuf::from),
            "--steps" => steps = Some(parse_number(&arg, args.next())?),
            "--config" | "-c" => config = args.next().map(PathBuf::from),
            "--budget-ms" => budget_ms = Some(parse_number(&arg, args.next())?),
            "--max-call-depth" => max_call_depth = Some(parse_number(&arg, args.next())?),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(anyhow!("unknown argument '{other}'")),
        }
    }
    let Some(fixture) = fixture else { return Err(anyhow!("--fixture <path> is required")) };
    Ok(CliOptions { fixture, write_output, check_golden, config, steps, budget_ms, max_call_depth })
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.ok_or_else(|| anyhow!("{flag} needs a value"))?;
    value.parse().map_err(|_| anyhow!("{flag}: '{value}' is not a valid number"))
}

fn print_help() {
    println!("Usage: script_harness --fixture <path> [--config <path>] [--golden <path>] [--write-output <path>]");
    println!("  -f, --fixture        Harness fixture JSON (control script, bodies, hooks)");
    println!("  -g, --golden         Golden output file to compare against");
    println!("  -o, --write-output   Path to write the actual output JSON");
    println!("  -c, --config         Runtime config JSON (falls back to defaults)");
    println!("      --steps <n>      Override the fixture's step count");
    println!("      --budget-ms <n>  Override the per-tick script budget");
    println!("      --max-call-depth <n>  Override the script call-depth limit");
}
