use anyhow::{bail, Context, Result};
use clap::Parser;
use retrace::cli::{Cli, Command, Direction, OutputFormat};
use retrace::config::RetraceConfig;
use retrace::lineage;
use retrace::playback::{ScanDirection, ScanOutcome};
use retrace::session::{LoadedTrace, TraceSession};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Read a trace file and resolve the version it is declared as
fn read_trace(path: &Path, trace_version: Option<String>) -> Result<(String, String)> {
    let payload = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace {}", path.display()))?;

    let version = match trace_version {
        Some(version) => version,
        None => {
            let value: serde_json::Value = serde_json::from_str(&payload)
                .with_context(|| format!("Trace {} is not valid JSON", path.display()))?;
            match value.get("version").and_then(|v| v.as_str()) {
                Some(version) => version.to_string(),
                None => bail!(
                    "Trace {} carries no version tag; pass --trace-version",
                    path.display()
                ),
            }
        }
    };

    Ok((payload, version))
}

async fn load(session: &TraceSession, path: &Path, trace_version: Option<String>) -> Result<Arc<LoadedTrace>> {
    let (payload, version) = read_trace(path, trace_version)?;
    session
        .load(payload, version)
        .await
        .with_context(|| format!("Failed to load trace {}", path.display()))
}

fn join_steps(steps: &[usize]) -> String {
    steps
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn print_inspection(loaded: &LoadedTrace, step: usize, format: OutputFormat) -> Result<()> {
    let Some(event) = loaded.trace().event(step) else {
        bail!(
            "Step {} is out of range (trace has {} events)",
            step,
            loaded.trace().len()
        );
    };

    let path = loaded.get_path(step)?;
    let precedents = loaded.precedents(step);
    let subtree = loaded.subtree(step);

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "step": step,
                "event": event,
                "path": path,
                "precedents": precedents,
                "subtree": subtree,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("step {}: {} {}", step, event.event_type, event.id);
            println!("path: {}", join_steps(&path));
            println!("precedents: {:?}", lineage::flatten(&precedents));
            println!("subtree: {:?}", lineage::flatten(&subtree));
        }
    }

    Ok(())
}

async fn run_scan(
    session: &TraceSession,
    loaded: Arc<LoadedTrace>,
    config: &RetraceConfig,
    from: usize,
    count: usize,
    direction: Direction,
) -> Result<()> {
    let breakpoints = config.breakpoint_set();
    let playback = session.playback();
    playback.step_to(i64::try_from(from).unwrap_or(i64::MAX));

    match direction {
        Direction::Forward => {
            let report = playback
                .step_with_breakpoint_check(loaded, Arc::new(breakpoints), count, 0)
                .await?;
            match report.outcome {
                ScanOutcome::Stopped(stop) => println!("{}", stop.message()),
                ScanOutcome::Advanced { count } => {
                    println!("No breakpoint in {} steps; now at step {}", count, report.state.step)
                }
            }
        }
        Direction::Backward => {
            match playback.find_breakpoint(&*loaded, &breakpoints, ScanDirection::Backward) {
                Some(stop) => println!("{}", stop.message()),
                None => println!("No breakpoint before step {}", playback.state().step),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Command::Inspect {
            trace,
            step,
            format,
            trace_version,
        } => {
            let session = TraceSession::new("inspect");
            let loaded = load(&session, &trace, trace_version).await?;
            print_inspection(&loaded, step, format)?;
        }
        Command::Scan {
            trace,
            config,
            from,
            count,
            direction,
            trace_version,
        } => {
            let config = match config {
                Some(path) => RetraceConfig::from_file(path)?,
                None => RetraceConfig::default(),
            };
            let session = TraceSession::with_scan_batch("scan", config.playback.scan_batch);
            let loaded = load(&session, &trace, trace_version).await?;
            let count = count.unwrap_or(config.playback.step_count);
            run_scan(&session, loaded, &config, from, count, direction).await?;
        }
    }

    Ok(())
}
