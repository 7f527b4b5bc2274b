//! MG-RAST exporter - command line entry point

use anyhow::{anyhow, Result};
use clap::error::ErrorKind;
use clap::Parser;
use mgx_common::logging::{init_logging, LogConfig, LogLevel};
use mgx_exporter::layout::ExportLayout;
use mgx_exporter::{Cli, Commands, Exporter, ExportConfig, ShockClient};
use std::process;
use tracing::{error, info};

fn log_config(debug: bool) -> LogConfig {
    let level = if debug { LogLevel::Debug } else { LogLevel::Info };
    LogConfig::builder()
        .level(level)
        .log_file_prefix("mgx-exporter")
        .build()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            process::exit(code);
        },
    };

    // Environment variables take precedence over the CLI defaults
    let config = log_config(cli.debug())
        .with_env_overrides()
        .unwrap_or_else(|e| {
            eprintln!("warning: ignoring logging environment: {}", e);
            log_config(cli.debug())
        });
    if let Err(e) = init_logging(&config) {
        eprintln!("warning: logging disabled: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let directory = cli.directory().clone();
    ExportLayout::new(&directory)
        .create()
        .map_err(|e| anyhow!("unable to create export directory {}: {}", directory.display(), e))?;

    match cli.command {
        Commands::Export(args) => {
            let config = args.to_config();
            let mut source = ShockClient::from_config(&config)?;
            let summary = Exporter::new(config)
                .with_progress(true)
                .export(&mut source)
                .await?;
            info!(
                projects = summary.projects,
                records = summary.records,
                "Export finished"
            );
        },
        Commands::Clean(target) => {
            Exporter::new(ExportConfig::new(target.directory)).clean()?;
            info!("Clean finished");
        },
        Commands::Remove { target, count } => {
            Exporter::new(ExportConfig::new(target.directory)).remove(count)?;
            info!(count, "Remove finished");
        },
        Commands::Index { target, force } => {
            let ledger = Exporter::new(ExportConfig::new(target.directory)).rebuild_index(force)?;
            info!(entries = ledger.len(), "Index finished");
        },
    }

    Ok(())
}
