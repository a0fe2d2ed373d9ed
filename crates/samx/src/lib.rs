//! 🦀 samx: CRM Analytics dashboards out of one org, into a template, into another.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod context;
pub mod decisions;
pub mod errors;
pub mod export;
pub mod fetcher;
pub mod install;
pub mod packager;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod schema;
pub mod supervisor;
pub mod transforms;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::app_config::AppConfig;
use crate::backends::CommandRunner;
use crate::decisions::UserDecisionPort;
use crate::supervisor::{RunSummary, Supervisor};

pub async fn run(
    app_config: AppConfig,
    decisions: &mut dyn UserDecisionPort,
    runner: Arc<dyn CommandRunner>,
) -> Result<RunSummary> {
    Supervisor::new(app_config, runner)
        .run(decisions)
        .await
        .context("💀 The migration did not finish")
}
