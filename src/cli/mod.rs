pub mod init;
pub mod preflight;
pub mod run;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dunn",
    about = "Overdue-loan dunning CLI for museum collections loans."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up dunn: choose a data directory and write default settings.
    Init {
        /// Path for dunn data (default: ~/Documents/dunn)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Run a dunning batch from a transaction export.
    Run {
        /// Path to the export file (default: <data_dir>/export.csv)
        #[arg(long)]
        export: Option<String>,
        /// Export format key (csv, xlsx)
        #[arg(long)]
        format: Option<String>,
        /// Compose and preview letters without sending any mail
        #[arg(long)]
        debug: bool,
        /// Restrict the run to one transaction number
        #[arg(long)]
        transaction: Option<i64>,
        /// Skip confirmation prompts before sending
        #[arg(long)]
        yes: bool,
        /// Fail loans that would need interactive input instead of prompting
        #[arg(long = "no-input")]
        no_input: bool,
        /// Continue sending even when the preflight table changed
        #[arg(long = "no-review")]
        no_review: bool,
    },
    /// Build or inspect the preflight table.
    Preflight {
        #[command(subcommand)]
        command: PreflightCommands,
    },
    /// Show settings, preflight counts, and tracking state.
    Status,
}

#[derive(Subcommand)]
pub enum PreflightCommands {
    /// Regenerate the preflight table from an export and persist the merge.
    Build {
        /// Path to the export file (default: <data_dir>/export.csv)
        #[arg(long)]
        export: Option<String>,
        /// Export format key (csv, xlsx)
        #[arg(long)]
        format: Option<String>,
    },
    /// Show what a regeneration would change without saving anything.
    Diff {
        #[arg(long)]
        export: Option<String>,
        #[arg(long)]
        format: Option<String>,
    },
}

pub(crate) fn resolve_export_path(
    settings: &crate::settings::Settings,
    export: Option<&str>,
) -> std::path::PathBuf {
    match export {
        Some(path) => std::path::PathBuf::from(path),
        None => settings.default_export_path(),
    }
}
