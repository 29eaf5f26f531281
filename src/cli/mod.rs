//! CLI module - Command line interface definitions and handlers

pub mod commands;
pub mod easy_mode;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Config;

/// Flux Drill - Automatic floppy disk imaging
///
/// Finds a responding drive, captures its flux once, tries every candidate
/// disk format against the capture and writes the best match as an image.
#[derive(Parser, Debug)]
#[command(name = "flux-drill")]
#[command(version)]
#[command(about = "💾 Automatic floppy disk imaging through a flux tool", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Guided mode: prompt for a file name and read one disk after another
    #[arg(long, short = 'E', global = true)]
    pub easy: bool,

    /// Verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Output format for results
    #[arg(long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read a disk: find drive, capture flux, detect format, write image
    Read(ReadArgs),

    /// Only look for a responding drive
    Probe(ProbeArgs),

    /// Find a drive and capture its flux, without decoding
    Capture(CaptureArgs),

    /// Score an existing flux file against the candidate formats
    Detect(DetectArgs),

    /// Show or create the configuration file
    Config(ConfigArgs),
}

/// Where and how to run the flux tool
#[derive(Debug, Clone, Default, Args)]
pub struct ToolArgs {
    /// Flux tool executable
    #[arg(long)]
    pub tool: Option<PathBuf>,

    /// Kill a single tool invocation after this long (e.g. 90s, 5m)
    #[arg(long, value_parser = parse_timeout)]
    pub timeout: Option<humantime::Duration>,

    /// Directory for flux captures and images
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,
}

impl ToolArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref tool) = self.tool {
            config.tool.program = tool.clone();
        }
        if let Some(ref timeout) = self.timeout {
            // humantime::Duration derefs to std::time::Duration
            config.tool.timeout_secs = timeout.as_secs();
        }
        if let Some(ref dir) = self.dump_dir {
            config.output.dump_dir = dir.clone();
        }
    }
}

/// Timeouts are stored in whole seconds
fn parse_timeout(value: &str) -> Result<humantime::Duration, String> {
    let timeout: humantime::Duration = value.parse().map_err(|e| format!("{}", e))?;
    if timeout.as_secs() == 0 || timeout.subsec_nanos() != 0 {
        return Err(format!("'{}' is not a whole number of seconds", value));
    }
    Ok(timeout)
}

/// Drive candidate overrides
#[derive(Debug, Clone, Default, Args)]
pub struct DriveArgs {
    /// Drives to probe, in order (e.g. A,B)
    #[arg(long, short, value_delimiter = ',')]
    pub drive: Option<Vec<String>>,
}

impl DriveArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref drives) = self.drive {
            config.capture.drives = drives.clone();
        }
    }
}

/// Flux capture overrides
#[derive(Debug, Clone, Default, Args)]
pub struct FluxArgs {
    /// Revolutions per track to capture
    #[arg(long)]
    pub revs: Option<u32>,

    /// Keep going when the flux read reports a failure
    #[arg(long)]
    pub lenient_capture: bool,
}

impl FluxArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(revs) = self.revs {
            config.capture.revolutions = revs;
        }
        if self.lenient_capture {
            config.capture.require_clean_capture = false;
        }
    }
}

/// Format candidate overrides
#[derive(Debug, Clone, Default, Args)]
pub struct FormatArgs {
    /// Formats to try, in order (e.g. ibm.1440,ibm.720)
    #[arg(long, short, value_delimiter = ',')]
    pub format: Option<Vec<String>>,
}

impl FormatArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref formats) = self.format {
            config.scoring.formats = formats.clone();
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct ReadArgs {
    /// Image file name, created inside the dump directory
    pub filename: Option<String>,

    #[command(flatten)]
    pub tool: ToolArgs,

    #[command(flatten)]
    pub drives: DriveArgs,

    #[command(flatten)]
    pub flux: FluxArgs,

    #[command(flatten)]
    pub formats: FormatArgs,

    /// Also save the run report as JSON here
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    #[command(flatten)]
    pub drives: DriveArgs,
}

#[derive(Debug, Clone, Parser)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub tool: ToolArgs,

    #[command(flatten)]
    pub drives: DriveArgs,

    #[command(flatten)]
    pub flux: FluxArgs,
}

#[derive(Debug, Clone, Parser)]
pub struct DetectArgs {
    /// Flux file captured earlier
    #[arg(required = true)]
    pub flux_file: PathBuf,

    #[command(flatten)]
    pub tool: ToolArgs,

    #[command(flatten)]
    pub formats: FormatArgs,
}

#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {
    /// Write a default config file if none exists
    #[arg(long)]
    pub init: bool,

    /// Print a commented sample config
    #[arg(long)]
    pub sample: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable (default)
    #[default]
    Human,
    /// JSON output
    Json,
}
