use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Where script snapshots are stored (overrides the config file)
    #[arg(long, global = true)]
    pub history_dir: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
    /// -v for debug logs, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report diagnostics; exits non-zero on errors
    Validate {
        /// Script file, or `-` for stdin
        input: PathBuf,
        /// Version the script is expected to be (v4, v5, v6)
        #[arg(long)]
        version_hint: Option<String>,
    },
    /// Apply automatic repairs
    Fix {
        input: PathBuf,
        /// Rewrite the input file in place
        #[arg(long)]
        write: bool,
    },
    /// Re-render with canonical layout
    Format {
        input: PathBuf,
        #[arg(long)]
        write: bool,
        #[arg(long)]
        indent_size: Option<usize>,
        #[arg(long)]
        tabs: bool,
    },
    /// Validate, fix when invalid, re-validate and format
    Process {
        input: PathBuf,
        #[arg(long)]
        version_hint: Option<String>,
    },
    /// Rewrite a script for another language version
    Convert {
        input: PathBuf,
        /// v4, v5 or v6
        #[arg(long)]
        target: String,
        #[arg(long)]
        write: bool,
    },
    /// Store a snapshot and print its id
    Save {
        input: PathBuf,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List stored snapshots of a script
    History { id: String },
    /// Print one stored snapshot (latest by default)
    Show {
        id: String,
        #[arg(long)]
        index: Option<usize>,
    },
    /// Positional line diff of two script files
    Diff { old: PathBuf, new: PathBuf },
    /// Positional line diff of two stored snapshots
    DiffRecords { id: String, a: usize, b: usize },
}
