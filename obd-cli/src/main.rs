//! OBD Signal Decoder CLI Application
//!
//! This is the command-line interface for the OBD signal decoder.
//! It uses the obd-decoder library and adds:
//! - One-off decoding of captured responses
//! - Calibration suites (captures with expected values) run in parallel
//! - Canonical formatting of signal-set files
//! - Linting of model-year windows

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use obd_decoder::{load_signalset_file, CanIdFormat, Decoder, DecoderConfig};
use std::path::{Path, PathBuf};

mod config;
mod report;
mod runner;

/// OBD Signal Decoder - Decode diagnostic responses captured from a CAN bus
#[derive(Parser, Debug)]
#[command(name = "obd-cli")]
#[command(about = "Decode OBD-II / UDS responses with signal-set definitions", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode one captured response
    Decode {
        /// Signal-set JSON file
        #[arg(short, long, value_name = "FILE")]
        signalset: PathBuf,

        /// Vehicle model year
        #[arg(short, long)]
        year: u16,

        /// Hex capture file, one frame per line
        #[arg(short, long, value_name = "FILE")]
        capture: PathBuf,

        /// Signals to decode (default: every signal the response answers)
        #[arg(long = "signal", value_name = "NAME")]
        signals: Vec<String>,

        /// Arbitration ID width of the capture lines
        #[arg(long, value_enum, default_value_t = IdFormatArg::Auto)]
        id_format: IdFormatArg,

        /// Accept responses from any arbitration ID
        #[arg(long)]
        any_responder: bool,
    },

    /// Run a calibration suite
    Calibrate {
        /// Suite TOML file
        #[arg(short, long, value_name = "FILE")]
        suite: PathBuf,

        /// Also write the report to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Rewrite signal-set files in canonical form
    Format {
        /// Signal-set JSON files
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Only check; fail if a file is not canonical
        #[arg(long)]
        check: bool,
    },

    /// Report overlapping model-year windows
    Lint {
        /// Signal-set JSON file
        #[arg(short, long, value_name = "FILE")]
        signalset: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IdFormatArg {
    Standard,
    Extended,
    Auto,
}

impl From<IdFormatArg> for CanIdFormat {
    fn from(arg: IdFormatArg) -> Self {
        match arg {
            IdFormatArg::Standard => CanIdFormat::Standard,
            IdFormatArg::Extended => CanIdFormat::Extended,
            IdFormatArg::Auto => CanIdFormat::Auto,
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("OBD Signal Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", obd_decoder::VERSION);

    match args.command {
        Command::Decode {
            signalset,
            year,
            capture,
            signals,
            id_format,
            any_responder,
        } => {
            let config = DecoderConfig::new()
                .with_id_format(id_format.into())
                .with_response_id_check(!any_responder);
            decode_mode(&signalset, year, &capture, &signals, config)
        }
        Command::Calibrate { suite, output } => calibrate_mode(&suite, output.as_deref()),
        Command::Format { files, check } => format_mode(&files, check),
        Command::Lint { signalset } => lint_mode(&signalset),
    }
}

/// Decode mode - load signal set, decode capture, print results
fn decode_mode(
    signalset: &Path,
    year: u16,
    capture: &Path,
    signals: &[String],
    config: DecoderConfig,
) -> Result<()> {
    let catalog = load_signalset_file(signalset)
        .with_context(|| format!("Failed to load signal set {:?}", signalset))?;
    let decoder = Decoder::new(&catalog, config);

    let text = std::fs::read_to_string(capture)
        .with_context(|| format!("Failed to read capture {:?}", capture))?;
    let frames = decoder.parse_capture(&text)?;

    let decoded = if signals.is_empty() {
        decoder.decode_response(year, &frames)?
    } else {
        let response = decoder.reassemble(&frames)?;
        signals
            .iter()
            .map(|name| decoder.decode_payload(year, &response, name))
            .collect::<obd_decoder::Result<Vec<_>>>()?
    };

    if decoded.is_empty() {
        log::warn!("No signal of {:?} answers this response for MY{}", signalset, year);
    }
    for signal in decoded {
        let unit = signal.unit.as_deref().unwrap_or("");
        match signal.value_description {
            Some(description) => println!("{} = {} {} ({})", signal.name, signal.value, unit, description),
            None => println!("{} = {} {}", signal.name, signal.value, unit),
        }
    }
    Ok(())
}

/// Calibrate mode - run every case of a suite and report
fn calibrate_mode(suite_path: &Path, output: Option<&Path>) -> Result<()> {
    let suite = config::load_suite(suite_path)?;
    let signalset = suite.signalset_path(suite_path);
    let catalog = load_signalset_file(&signalset)
        .with_context(|| format!("Failed to load signal set {:?}", signalset))?;

    log::info!(
        "Suite {:?}: {} groups, {} checks",
        suite_path,
        suite.groups.len(),
        suite.num_checks()
    );

    let results = runner::run_suite(&suite, &catalog);
    let report = report::SuiteReport::new(suite_path, results);
    let text = report.render();
    print!("{}", text);

    if let Some(path) = output {
        std::fs::write(path, &text).with_context(|| format!("Failed to write report {:?}", path))?;
        log::info!("Report written to {:?}", path);
    }

    if !report.is_success() {
        bail!(
            "{} of {} cases failed",
            report.failed_cases(),
            report.results.len()
        );
    }
    Ok(())
}

/// Format mode - rewrite or check signal-set files
fn format_mode(files: &[PathBuf], check: bool) -> Result<()> {
    let mut unformatted = Vec::new();

    for path in files {
        let original = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let formatted = obd_decoder::format_signalset(&original)
            .with_context(|| format!("Failed to format {:?}", path))?;

        if formatted == original {
            log::debug!("{:?} already canonical", path);
            continue;
        }
        if check {
            println!("Would reformat: {}", path.display());
            unformatted.push(path);
        } else {
            std::fs::write(path, formatted).with_context(|| format!("Failed to write {:?}", path))?;
            println!("Formatted: {}", path.display());
        }
    }

    if !unformatted.is_empty() {
        bail!("{} file(s) are not canonically formatted", unformatted.len());
    }
    Ok(())
}

/// Lint mode - report rules whose model-year windows overlap
fn lint_mode(signalset: &Path) -> Result<()> {
    let catalog = load_signalset_file(signalset)
        .with_context(|| format!("Failed to load signal set {:?}", signalset))?;

    let overlaps = catalog.overlaps();
    for overlap in &overlaps {
        println!("{}", overlap);
    }

    let stats = catalog.stats();
    println!(
        "{} signals, {} rules, {} commands",
        stats.num_signals, stats.num_rules, stats.num_commands
    );

    if !overlaps.is_empty() {
        bail!("{} overlapping rule pair(s)", overlaps.len());
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_decode_args() {
        let args = Args::try_parse_from([
            "obd-cli", "-v", "decode", "--signalset", "civic.json", "--year", "2018", "--capture",
            "odo.txt", "--signal", "CIVIC_ODO", "--signal", "CIVIC_RUNTM",
        ])
        .unwrap();
        assert_eq!(args.verbose, 1);
        match args.command {
            Command::Decode { year, signals, .. } => {
                assert_eq!(year, 2018);
                assert_eq!(signals, vec!["CIVIC_ODO", "CIVIC_RUNTM"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_format_requires_files() {
        assert!(Args::try_parse_from(["obd-cli", "format", "--check"]).is_err());
    }
}
