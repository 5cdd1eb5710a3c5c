mod config;
mod decoder;
mod descriptor;
mod engine;
mod error;
mod findings;
mod ir;
mod opcodes;
mod report;
mod rules;
mod scan;
mod stack;
#[cfg(test)]
mod test_harness;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::config::AnalysisConfig;
use crate::engine::Engine;
use crate::report::{build_invocation, build_sarif};
use crate::scan::scan_inputs;

/// CLI arguments for bytewise execution.
#[derive(Parser, Debug)]
#[command(
    name = "bytewise",
    about = "Detect bytecode-level anti-patterns in JVM class files and JAR files, reported as SARIF.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// JSON analysis configuration.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Body length in bytes at which a method is reported as too large to JIT.
    #[arg(long, value_name = "BYTES")]
    threshold: Option<usize>,
    /// Run only the given rule; repeat to enable several.
    #[arg(long = "rule", value_name = "ID")]
    rules: Vec<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "error" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = analysis_config(&cli)?;

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input)?;
    let scanned_at = Instant::now();

    let engine = Engine::new(&config, Arc::new(AtomicBool::new(false)));
    let output = engine.analyze_classes(&scan.classes);
    info!(
        "analysed {} methods ({} skipped): {} findings, {} diagnostics",
        output.method_count,
        output.skipped_methods,
        output.findings.len(),
        output.diagnostics.len()
    );

    let class_count = scan.class_count();
    let artifact_count = scan.artifacts.len();
    let invocation = build_invocation(std::env::args().collect(), &output.diagnostics);
    let sarif = build_sarif(engine.rules(), &output, scan.artifacts, invocation);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} classes={} methods={} artifacts={}",
            started_at.elapsed().as_millis(),
            scanned_at.duration_since(started_at).as_millis(),
            scanned_at.elapsed().as_millis(),
            class_count,
            output.method_count,
            artifact_count
        );
    }

    Ok(())
}

/// Configuration file first, then command-line overrides.
fn analysis_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(threshold) = cli.threshold {
        config = config.with_threshold(threshold)?;
    }
    if !cli.rules.is_empty() {
        config = config.with_enabled_rules(cli.rules.iter().cloned())?;
    }
    Ok(config)
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
