//! 🧳 MigrationContext: everything one run knows, carried by hand from stage to stage.
//!
//! Created once, before the first API call, and passed by reference through
//! resolve → fetch → transform → package → install. Nothing in here is global,
//! so two runs in one process (the tests do this a lot) never step on each other.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::packager::TemplateLayout;
use crate::transforms::{DatasetRenamePlan, FieldRenameMap};

/// 🔧 The `[template]` table of the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct TemplateConfig {
    /// 🏷️ operator-facing template name; asked for when absent
    #[serde(default)]
    pub label: Option<String>,
    /// 🎲 fixed suffix (`_ABC`); three random uppercase letters when absent
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// 🤖 install unattended after deploy; asked for when absent
    #[serde(default)]
    pub auto_install: Option<bool>,
    /// 📐 `assetVersion` of the manifest and the recipe
    #[serde(default = "default_asset_version", alias = "api_version")]
    pub asset_version: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("samx_out")
}

fn default_asset_version() -> String {
    "58.0".to_string()
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            label: None,
            suffix: None,
            output_dir: default_output_dir(),
            auto_install: None,
            asset_version: default_asset_version(),
        }
    }
}

/// 🎲 `_` plus three uppercase letters. 17,576 flavours, collisions are the operator's problem.
pub fn random_suffix() -> String {
    let mut rng = rand::rng();
    let letters: String = (0..3)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect();
    format!("_{letters}")
}

/// 🏷️ `Sales Pack` + `_ABC` → `Sales_Pack_ABC`.
pub fn api_name(label: &str, suffix: &str) -> String {
    format!("{}{suffix}", label.trim().replace(' ', "_"))
}

#[derive(Debug)]
pub struct MigrationContext {
    pub suffix: String,
    pub label: String,
    pub api_name: String,
    pub auto_install: bool,
    pub asset_version: String,
    pub layout: TemplateLayout,
    pub plans: FieldRenameMap,
    warnings: Vec<String>,
    started: Instant,
}

impl MigrationContext {
    pub fn new(config: &TemplateConfig, label: String, auto_install: bool) -> Self {
        let suffix = config.suffix.clone().unwrap_or_else(random_suffix);
        let api_name = api_name(&label, &suffix);
        let layout = TemplateLayout::new(&config.output_dir, &api_name);
        Self {
            suffix,
            label,
            api_name,
            auto_install,
            asset_version: config.asset_version.clone(),
            layout,
            plans: FieldRenameMap::default(),
            warnings: Vec::new(),
            started: Instant::now(),
        }
    }

    /// ⚠️ Logged now, listed again in the run summary.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("⚠️ {message}");
        self.warnings.push(message);
    }

    /// 📥 Warnings some other stage already logged.
    pub fn absorb_warnings(&mut self, messages: impl IntoIterator<Item = String>) {
        self.warnings.extend(messages);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn dataset_target_name(&self, name: &str) -> String {
        format!("{name}{}", self.suffix)
    }

    pub fn plan_for(&self, dataset: &str) -> Option<&DatasetRenamePlan> {
        self.plans.plan(dataset)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_suffix_is_three_shouty_letters() {
        for _ in 0..50 {
            let suffix = random_suffix();
            assert_eq!(suffix.len(), 4);
            assert!(suffix.starts_with('_'));
            assert!(suffix[1..].chars().all(|c| c.is_ascii_uppercase()), "{suffix}");
        }
    }

    #[test]
    fn the_one_where_the_api_name_loses_its_spaces() {
        let config = TemplateConfig {
            suffix: Some("_XYZ".into()),
            output_dir: PathBuf::from("/tmp/out"),
            ..Default::default()
        };
        let mut ctx = MigrationContext::new(&config, "Sales Pack".into(), false);
        assert_eq!(ctx.api_name, "Sales_Pack_XYZ");
        assert_eq!(ctx.dataset_target_name("OpportunityDS"), "OpportunityDS_XYZ");
        assert_eq!(ctx.layout.project_root, PathBuf::from("/tmp/out/Sales_Pack_XYZ"));
        ctx.warn("dashboard 'Gone' could not be fetched");
        assert_eq!(ctx.warnings().len(), 1);
    }
}
