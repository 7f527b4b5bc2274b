//! MG-RAST sequence exporter
//!
//! Streams metagenome sequence files from a Shock object store into a
//! rotating set of `<n>.fasta.gz` files, grouped by project, and keeps an
//! `export.index` ledger of which records each project occupies. A killed
//! export can be resumed, or repaired with `clean` and `remove`.
//!
//! # Example
//!
//! ```no_run
//! use mgx_exporter::{ExportConfig, Exporter, ShockClient};
//!
//! #[tokio::main]
//! async fn main() -> mgx_exporter::Result<()> {
//!     let config = ExportConfig::new("./export").with_shock_url("shock.mg-rast.org");
//!     let mut source = ShockClient::from_config(&config)?;
//!     Exporter::new(config).export(&mut source).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod exporter;
pub mod layout;
pub mod ledger;
pub mod progress;
pub mod record;
pub mod source;
pub mod writer;

pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use exporter::{ExportSummary, Exporter};
pub use ledger::{Ledger, LedgerEntry};
pub use source::{NodeSource, ShockClient, SourceItem};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// MG-RAST sequence exporter
#[derive(Parser, Debug)]
#[command(name = "mgx-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Export directory of the selected command
    pub fn directory(&self) -> &PathBuf {
        match &self.command {
            Commands::Export(args) => &args.target.directory,
            Commands::Clean(target) => &target.directory,
            Commands::Remove { target, .. } | Commands::Index { target, .. } => &target.directory,
        }
    }

    /// Whether debug output was requested
    pub fn debug(&self) -> bool {
        matches!(&self.command, Commands::Export(args) if args.debug)
    }
}

/// Export directory shared by every command
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Directory holding the export files and export.index
    #[arg(short, long, env = "EXPORT_DIR")]
    pub directory: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Shock server URL
    #[arg(short, long, env = "SHOCK_URL")]
    pub shock: Option<String>,

    /// Only export this project
    #[arg(short, long)]
    pub project: Option<String>,

    /// Pipeline stage to export
    #[arg(long, default_value = config::DEFAULT_STAGE)]
    pub stage: String,

    /// Export file size in GB (MB with --debug)
    #[arg(long, default_value_t = config::DEFAULT_FILE_SIZE)]
    pub size: u64,

    /// Debug logging and MB-sized export files
    #[arg(long)]
    pub debug: bool,
}

impl ExportArgs {
    pub fn to_config(&self) -> ExportConfig {
        let mut config = ExportConfig::new(self.target.directory.clone())
            .with_stage(self.stage.clone())
            .with_file_size(self.size)
            .with_debug(self.debug);
        if let Some(shock) = &self.shock {
            config = config.with_shock_url(shock.clone());
        }
        if let Some(project) = &self.project {
            config = config.with_project(project.clone());
        }
        config
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export new projects from Shock
    Export(ExportArgs),

    /// Remove non-indexed files and truncate the last file to the index
    Clean(TargetArgs),

    /// Remove the last exported projects from the index and files
    Remove {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of index entries to remove
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },

    /// Rebuild export.index from the export files
    Index {
        #[command(flatten)]
        target: TargetArgs,

        /// Overwrite an existing index
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_export_args() {
        let cli = Cli::try_parse_from([
            "mgx-exporter",
            "export",
            "--directory",
            "/data/export",
            "--shock",
            "shock.example.org",
            "--size",
            "5",
            "--debug",
        ])
        .unwrap();

        assert!(cli.debug());
        let Commands::Export(args) = cli.command else {
            panic!("expected export");
        };
        let config = args.to_config();
        assert_eq!(config.stage, "screen");
        assert_eq!(config.rotate_threshold(), 5 * 1024 * 1024);
    }

    #[test]
    fn test_remove_defaults_to_one() {
        let cli = Cli::try_parse_from(["mgx-exporter", "remove", "-d", "/tmp/x"]).unwrap();
        assert!(matches!(cli.command, Commands::Remove { count: 1, .. }));
        assert_eq!(cli.directory(), &PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
