//! CLI argument parsing for retrace

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for inspection results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

/// Scan direction on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    /// Breakpoint-checked advance from the start step
    Forward,
    /// Search toward the first step for the nearest breakpoint
    Backward,
}

#[derive(Parser, Debug)]
#[command(name = "retrace")]
#[command(version)]
#[command(about = "Replay and inspect recorded search traces", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the lineage of one step
    Inspect {
        /// Trace file (JSON)
        trace: PathBuf,

        /// Step to inspect
        #[arg(short, long)]
        step: usize,

        /// Output format (text or json)
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        /// Declared trace version (defaults to the payload's own tag)
        #[arg(long = "trace-version", value_name = "VERSION")]
        trace_version: Option<String>,
    },

    /// Advance through a trace, stopping at the first breakpoint
    Scan {
        /// Trace file (JSON)
        trace: PathBuf,

        /// Breakpoint configuration (retrace.toml)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Step the scan starts from
        #[arg(long, default_value = "0")]
        from: usize,

        /// Steps to advance (defaults to playback.step_count)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Scan direction
        #[arg(long, value_enum, default_value = "forward")]
        direction: Direction,

        /// Declared trace version (defaults to the payload's own tag)
        #[arg(long = "trace-version", value_name = "VERSION")]
        trace_version: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_inspect() {
        let cli = Cli::parse_from(["retrace", "inspect", "trace.json", "--step", "3"]);
        match cli.command {
            Command::Inspect {
                trace,
                step,
                format,
                trace_version,
            } => {
                assert_eq!(trace, PathBuf::from("trace.json"));
                assert_eq!(step, 3);
                assert_eq!(format, OutputFormat::Text);
                assert!(trace_version.is_none());
            }
            _ => panic!("expected inspect"),
        }
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_inspect_json_with_version() {
        let cli = Cli::parse_from([
            "retrace",
            "inspect",
            "t.json",
            "-s",
            "0",
            "--format",
            "json",
            "--trace-version",
            "1.3.0",
        ]);
        let Command::Inspect {
            format,
            trace_version,
            ..
        } = cli.command
        else {
            panic!("expected inspect");
        };
        assert_eq!(format, OutputFormat::Json);
        assert_eq!(trace_version.as_deref(), Some("1.3.0"));
    }

    #[test]
    fn test_cli_scan_defaults() {
        let cli = Cli::parse_from(["retrace", "scan", "t.json"]);
        let Command::Scan {
            config,
            from,
            count,
            direction,
            ..
        } = cli.command
        else {
            panic!("expected scan");
        };
        assert!(config.is_none());
        assert_eq!(from, 0);
        assert!(count.is_none());
        assert_eq!(direction, Direction::Forward);
    }

    #[test]
    fn test_cli_scan_backward_with_config() {
        let cli = Cli::parse_from([
            "retrace",
            "--debug",
            "scan",
            "t.json",
            "--config",
            "retrace.toml",
            "--from",
            "7",
            "-n",
            "2",
            "--direction",
            "backward",
        ]);
        assert!(cli.debug);
        let Command::Scan {
            config,
            from,
            count,
            direction,
            ..
        } = cli.command
        else {
            panic!("expected scan");
        };
        assert_eq!(config, Some(PathBuf::from("retrace.toml")));
        assert_eq!(from, 7);
        assert_eq!(count, Some(2));
        assert_eq!(direction, Direction::Backward);
    }

    #[test]
    fn test_cli_inspect_requires_step() {
        assert!(Cli::try_parse_from(["retrace", "inspect", "t.json"]).is_err());
    }
}
