//! 🔧 App Configuration: one TOML file, a pile of `SAMX_*` env vars, one struct.
//!
//! 📡 "Which org are we talking to?" is a question the operator should answer
//! once, in a file, not every morning in a terminal. 🦆
//!
//! Every section has defaults, so an empty file is a valid config. The run
//! then asks the operator for whatever it still doesn't know (template label,
//! auto-install, which dashboards), through the decision port.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::SourceConfig;
use crate::context::TemplateConfig;
use crate::export::ExportConfig;
use crate::install::DestinationConfig;
use crate::retry::RetryConfig;
use crate::transforms::RenameConfig;

/// 📦 Everything one migration run needs to know up front.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub rename: RenameConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// 🧰 the CLI binary; `sf` shims and absolute paths both work
    #[serde(default = "default_sfdx_program")]
    pub sfdx_program: String,
}

fn default_sfdx_program() -> String {
    "sfdx".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            template: TemplateConfig::default(),
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            export: ExportConfig::default(),
            rename: RenameConfig::default(),
            retry: RetryConfig::default(),
            sfdx_program: default_sfdx_program(),
        }
    }
}

/// 🚀 Env vars (`SAMX_EXPORT__PAGE_SIZE=5000`) first, then the TOML file on top.
///
/// A `config_file_name` that does not exist on disk contributes nothing,
/// which is how the default `samx.toml` stays optional.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "(environment only)".to_string())
    );

    let config = Figment::new().merge(Env::prefixed("SAMX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from '{}' and the SAMX_* environment. \
             One of them has a typo and both of them are pretending it's the other one.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from the SAMX_* environment variables.".to_string(),
    };
    config.extract().context(context_msg)
}
