//! Script driver
//!
//! Compiles the user script once, then executes it the configured number of
//! times, either directly or through an environment's
//! `register_usercode` / `execute_usercode` pair.

use crate::settings::RuntimeSettings;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use vault_script::mlua::{Function, MultiValue, Value};
use vault_script::{CompiledScript, ScriptRuntime, TypeRegistry};

/// Outcome of one driver run.
#[derive(Debug)]
pub struct RunReport {
    pub iterations: u64,
    pub elapsed: Duration,
    /// Values returned by the last execution, rendered for logging.
    pub last_result: Vec<String>,
}

pub fn run(settings: &RuntimeSettings, script_path: &Path, registry: &TypeRegistry) -> Result<RunReport> {
    let runtime = ScriptRuntime::with_settings(settings.script.clone());
    runtime.install(registry)?;

    let mut script = CompiledScript::from_path(script_path, settings.script.compile_options())?;
    tracing::info!(
        script = script.name(),
        bytes = script.bytecode().len(),
        "script compiled"
    );

    let report = match &settings.environment {
        Some(environment) => run_in_environment(&runtime, &mut script, environment, settings.iterations)?,
        None => run_direct(&runtime, &mut script, settings.iterations)?,
    };

    tracing::info!(
        "{} Lua executions took {}ns",
        report.iterations,
        report.elapsed.as_nanos()
    );
    Ok(report)
}

/// Reload and call the chunk on every iteration.
fn run_direct(runtime: &ScriptRuntime, script: &mut CompiledScript, iterations: u64) -> Result<RunReport> {
    let start = Instant::now();
    let mut last = MultiValue::new();
    for _ in 0..iterations {
        let chunk = runtime.load(script)?;
        last = chunk.call(()).context("execution error")?;
    }

    Ok(RunReport {
        iterations,
        elapsed: start.elapsed(),
        last_result: render(&last),
    })
}

/// Hand the loaded chunk to the environment once and call it by id.
fn run_in_environment(
    runtime: &ScriptRuntime,
    script: &mut CompiledScript,
    environment: &Path,
    iterations: u64,
) -> Result<RunReport> {
    runtime.execute_file(environment)?;

    let register = required_function(runtime, "register_usercode")?;
    let chunk = runtime.load(script)?;
    let id: Value = register.call(chunk).context("execution error")?;
    if !matches!(id, Value::Integer(_) | Value::Number(_)) {
        bail!(
            "expected user function registration to return a number, but got '{}'",
            id.type_name()
        );
    }

    let execute = required_function(runtime, "execute_usercode")?;
    let start = Instant::now();
    let mut last = MultiValue::new();
    for _ in 0..iterations {
        last = execute.call(id.clone()).context("execution error")?;
    }

    Ok(RunReport {
        iterations,
        elapsed: start.elapsed(),
        last_result: render(&last),
    })
}

fn required_function(runtime: &ScriptRuntime, name: &str) -> Result<Function> {
    let function: Option<Function> = runtime.lua().globals().get(name)?;
    function.with_context(|| format!("unable to find required function '{name}'"))
}

fn render(values: &MultiValue) -> Vec<String> {
    values
        .iter()
        .map(|value| match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.to_string_lossy(),
            other => other.type_name().to_string(),
        })
        .collect()
}
