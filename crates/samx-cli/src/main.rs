//! 🚀 samx-cli: loads the config, sets up logging, hands over to the library.
//!
//! 🎬 *[narrator voice]* "The dashboards had lived in one org their whole lives..."

mod prompts;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use samx::backends::SystemRunner;
use samx::export::split_csv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::prompts::ConsoleDecisions;

#[derive(Debug, Parser)]
#[command(name = "samx", version, about = "CRM Analytics dashboards, from one org to another")]
struct Cli {
    /// 🔧 TOML config; missing is fine, env vars and prompts fill the gaps
    #[arg(long, short, global = true, default_value = "samx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🎬 dashboards to template to destination org (the default)
    Migrate,
    /// 📄 one dataset to CSV with its schema and user xmd
    ExportDataset {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// ✂️ split a CSV into `__PART__` files at a byte threshold
    SplitCsv {
        file: PathBuf,
        #[arg(long)]
        threshold: Option<u64>,
    },
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_file = cli
        .config
        .try_exists()
        .with_context(|| format!("💀 Could not check whether '{}' exists. Use an absolute path if cwd is in doubt", cli.config.display()))?
        .then_some(cli.config.as_path());
    let mut app_config = samx::app_config::load_config(config_file)
        .context("💀 Could not load the config. Check the TOML and any SAMX_ env vars")?;

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let mut decisions = ConsoleDecisions::stdin();
            let summary = samx::run(app_config, &mut decisions, Arc::new(SystemRunner)).await?;
            println!("{}", summary.table());
        }
        Command::ExportDataset { dataset, out } => {
            if let Some(out) = out {
                app_config.template.output_dir = out;
            }
            let entry =
                samx::supervisor::export_single_dataset(&app_config, Arc::new(SystemRunner), None, &dataset)
                    .await?;
            info!("📄 {} written as {} with schema {}", entry.name, entry.file, entry.schema);
        }
        Command::SplitCsv { file, threshold } => {
            let threshold = threshold.unwrap_or(app_config.export.split_threshold_bytes);
            for part in split_csv(&file, threshold)? {
                println!("{}", part.display());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let result = dispatch(Cli::parse()).await;

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 one layer at a time
        let mut smells_like_the_network = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("Connection refused")
                || cause_str.contains("connection refused")
                || cause_str.contains("dns error")
                || cause_str.contains("No such file or directory (os error 2)")
            {
                smells_like_the_network = true;
            }
        }
        if smells_like_the_network {
            error!(
                "🔧 hint: something isn't reachable. Check that the org's instance url answers, \
                that your session hasn't expired (`sfdx force:org:display`), and that `sfdx` is on PATH. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}
