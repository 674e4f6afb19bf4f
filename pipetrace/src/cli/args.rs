//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::{DEFAULT_BUFFER_SIZE_MB, DEFAULT_OUTPUT};

#[derive(Parser, Debug)]
#[command(
    name = "pipetrace",
    version,
    about = "Capture a runtime trace from a running .NET process",
    after_help = "\
EXAMPLES:
    pipetrace -p my-app                          Trace by name until Ctrl+C
    pipetrace -p 1234 --duration 10              Trace pid 1234 for 10 seconds
    pipetrace -p 1234 --providers 'Custom:0xFF:5'
    pipetrace --list                             Show traceable processes"
)]
pub struct Args {
    /// The ID or name of the process to collect the trace from
    #[arg(short, long, value_name = "ID|NAME", required_unless_present = "list")]
    pub process: Option<String>,

    /// The output path for the collected trace data
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Size of the in-memory circular buffer in megabytes
    #[arg(long = "buffersize", value_name = "MB", default_value_t = DEFAULT_BUFFER_SIZE_MB)]
    pub buffer_size: u32,

    /// Stop after N seconds (0 = until interrupted)
    #[arg(long, value_name = "SECS", default_value = "0")]
    pub duration: u64,

    /// Providers to enable: Name[:Keywords[:Level[:key=value;...]]], comma separated
    #[arg(long, value_name = "SPEC", conflicts_with = "providers_file")]
    pub providers: Option<String>,

    /// JSON file with an array of providers to enable
    #[arg(long, value_name = "FILE")]
    pub providers_file: Option<PathBuf>,

    /// Do not request rundown events at the end of the session
    #[arg(long)]
    pub no_rundown: bool,

    /// List processes that publish a diagnostics endpoint, then exit
    #[arg(long)]
    pub list: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
