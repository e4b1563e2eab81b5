pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod processor;
pub mod writer;

pub use config::{Config, FormatOptions, ValidationBudget};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, EngineResult, HistoryError};
pub use model::{
    Diagnostic, DiagnosticKind, FixResult, FormatResult, PipelineReport, Script, ScriptVersionRecord,
    Severity, ValidationResult, Version,
};

use std::io::{Read, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use writer::report::emit;

/// Install the stderr log subscriber; `RUST_LOG` wins over `verbosity`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pinecheck={level}")));
    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .with_context(|| "Reading script from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))
}

fn write_back(path: &Path, text: &str) -> anyhow::Result<()> {
    anyhow::ensure!(path != Path::new("-"), "--write needs a file, not stdin");
    std::fs::write(path, text).with_context(|| format!("Writing {}", path.display()))
}

pub fn run() -> anyhow::Result<ExitCode> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    // 1. ── Configure ──────────────────────────────────────────────────
    let mut config = Config::load(args.config.as_deref()).with_context(|| "Loading configuration")?;
    if let Some(dir) = args.history_dir {
        config.history_dir = dir;
    }
    let engine = Engine::from_config(config);

    // 2. ── Dispatch ───────────────────────────────────────────────────
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut code = ExitCode::SUCCESS;

    match args.command {
        Command::Validate { input, version_hint } => {
            let script = read_script(&input)?;
            let result = engine
                .validate(&script, version_hint.as_deref())
                .with_context(|| format!("Validating {}", input.display()))?;
            if !result.valid {
                code = ExitCode::FAILURE;
            }
            emit(&result, args.json, &mut out)?;
        }
        Command::Fix { input, write } => {
            let script = read_script(&input)?;
            let result = engine.fix(&script);
            if write && result.fixed {
                write_back(&input, result.script.as_str())?;
            }
            emit(&result, args.json, &mut out)?;
        }
        Command::Format {
            input,
            write,
            indent_size,
            tabs,
        } => {
            let script = read_script(&input)?;
            let mut options = engine.config().format.clone();
            if let Some(size) = indent_size {
                options.indent_size = size;
            }
            options.use_tabs |= tabs;
            let result = engine.format(&script, Some(&options));
            if write && result.formatted.as_str() != script {
                write_back(&input, result.formatted.as_str())?;
            }
            emit(&result, args.json, &mut out)?;
        }
        Command::Process { input, version_hint } => {
            let script = read_script(&input)?;
            let report = engine
                .process(&script, version_hint.as_deref())
                .with_context(|| format!("Processing {}", input.display()))?;
            if report.revalidated.as_ref().is_some_and(|r| !r.valid) {
                code = ExitCode::FAILURE;
            }
            emit(&report, args.json, &mut out)?;
        }
        Command::Convert { input, target, write } => {
            let script = read_script(&input)?;
            let converted = engine
                .convert_version(&script, &target)
                .with_context(|| format!("Converting {} to {target}", input.display()))?;
            if write {
                write_back(&input, &converted)?;
            }
            if args.json {
                serde_json::to_writer_pretty(&mut out, &converted)?;
                writeln!(out)?;
            } else {
                out.write_all(converted.as_bytes())?;
            }
        }
        Command::Save { input, notes } => {
            let script = read_script(&input)?;
            let id = engine
                .save_version(&script, notes.as_deref())
                .with_context(|| "Saving script version")?;
            if args.json {
                writeln!(out, "{}", serde_json::json!({ "id": id }))?;
            } else {
                writeln!(out, "{id}")?;
            }
        }
        Command::History { id } => {
            let entries = engine.get_history(&id).with_context(|| format!("Reading history of {id}"))?;
            emit(&entries, args.json, &mut out)?;
        }
        Command::Show { id, index } => {
            let record = engine
                .get_version(&id, index)
                .with_context(|| format!("Reading history of {id}"))?;
            emit(&record, args.json, &mut out)?;
        }
        Command::Diff { old, new } => {
            let lines = engine.compare_versions(&read_script(&old)?, &read_script(&new)?);
            emit(&lines, args.json, &mut out)?;
        }
        Command::DiffRecords { id, a, b } => {
            let lines = engine
                .diff_records(&id, a, b)
                .with_context(|| format!("Comparing entries {a} and {b} of {id}"))?;
            emit(&lines, args.json, &mut out)?;
        }
    }

    Ok(code)
}
