use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "xtalmod - reconstruct modulated crystal structures from JANA M50/M40 files.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Expand a structure to its full atom set and print every atom.
    Show(ShowArgs),
    /// Summarize a structure file without expanding it.
    Info(InfoArgs),
}

/// Arguments for the `show` subcommand.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Path to the M50 structure file (a sibling .m40 is read when present).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Internal phase t at which modulation waves are evaluated,
    /// as comma-separated components (e.g. "0.4" or "0.4,0,0").
    #[arg(short = 't', long, value_name = "T1[,T2,T3]", default_value = "0")]
    pub phase: String,

    /// Restrict displacive modulation to these axes (e.g. "xz").
    #[arg(long, value_name = "AXES")]
    pub axes: Option<String>,
}

/// Arguments for the `info` subcommand.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to the M50 structure file (a sibling .m40 is read when present).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,
}
