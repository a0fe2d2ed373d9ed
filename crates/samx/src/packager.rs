//! 📦 Packager: everything the run produced, laid out the way `force:source:deploy` wants it.
//!
//! ```text
//!   <output>/<api>/
//!   ├── sfdx-project.json
//!   └── force-app/main/default/waveTemplates/<api>/
//!       ├── template-info.json      folder.json        variables.json
//!       ├── ui.json                 auto-install.json  template-to-app-rules.json
//!       ├── dashboards/<name>.json
//!       ├── components/<name>.json
//!       ├── recipes/<api>_af.json   (only with Action Framework fields)
//!       └── external_files/<target>.csv | .json | _XMD.json
//! ```
//!
//! The CSVs are already on disk when the packager runs (the exporter writes
//! straight into `external_files/`). Everything else is written here, once,
//! from values the supervisor hands over. A failed install leaves the whole
//! folder in place, so the operator can look at it and deploy by hand.

pub mod action_framework;
pub mod manifest;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub use action_framework::{ActionField, ActionFramework};
pub use manifest::{AssetEntry, ExternalFileEntry, TemplateManifest};

use crate::common::str_field;
use crate::context::MigrationContext;
use crate::errors::SamxError;

/// 📁 Where every file of one template goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayout {
    /// 🏠 the sfdx project; deploys run from here
    pub project_root: PathBuf,
    pub template_dir: PathBuf,
    pub dashboards: PathBuf,
    pub components: PathBuf,
    pub recipes: PathBuf,
    pub external_files: PathBuf,
}

impl TemplateLayout {
    pub fn new(output_dir: &Path, api_name: &str) -> Self {
        let project_root = output_dir.join(api_name);
        let template_dir = project_root
            .join("force-app")
            .join("main")
            .join("default")
            .join("waveTemplates")
            .join(api_name);
        Self {
            dashboards: template_dir.join("dashboards"),
            components: template_dir.join("components"),
            recipes: template_dir.join("recipes"),
            external_files: template_dir.join("external_files"),
            template_dir,
            project_root,
        }
    }

    /// 🏗️ All directories plus `sfdx-project.json`. Safe to call twice.
    pub fn create(&self) -> Result<()> {
        for dir in [&self.dashboards, &self.components, &self.recipes, &self.external_files] {
            fs::create_dir_all(dir)
                .with_context(|| format!("💀 Could not create {}. Is the output dir writable?", dir.display()))?;
        }
        write_json(&self.project_root.join("sfdx-project.json"), &manifest::sfdx_project())?;
        debug!("🏗️ template layout ready at {}", self.template_dir.display());
        Ok(())
    }

    /// 📄 `external_files/<name>.<ext>`
    pub fn external_file(&self, name: &str, ext: &str) -> PathBuf {
        self.external_files.join(format!("{name}.{ext}"))
    }

    pub fn user_xmd_file(&self, target_dataset: &str) -> PathBuf {
        self.external_file(&format!("{target_dataset}_XMD"), "json")
    }

    pub fn recipe_file(&self, recipe: &str) -> PathBuf {
        self.recipes.join(format!("{recipe}.json"))
    }

    pub fn template_file(&self, name: &str) -> PathBuf {
        self.template_dir.join(name)
    }
}

/// ✍️ Pretty JSON to disk. Pretty, because someone will diff these by hand.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("💀 Could not serialize {}", path.display()))?;
    fs::write(path, text).with_context(|| format!("💀 Could not write {}", path.display()))
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("💀 Could not read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("💀 {} is not valid JSON", path.display()))
}

/// 📄 One exported dataset, ready to be written next to its CSV.
#[derive(Debug, Clone)]
pub struct DatasetFiles {
    pub label: String,
    pub target_dataset: String,
    /// 📁 the CSV, or its `__PART__` files
    pub files: Vec<PathBuf>,
    pub schema: Value,
    pub user_xmd: Value,
}

/// 🎁 The rewritten run, about to hit the disk.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub dashboards: Vec<Value>,
    pub components: Vec<Value>,
    pub datasets: Vec<DatasetFiles>,
}

fn relative(dir: &str, path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{dir}/{file_name}")
}

fn write_asset(dir: &Path, asset: &Value) -> Result<PathBuf> {
    let name = str_field(asset, "name");
    anyhow::ensure!(!name.is_empty(), "💀 An asset without a name cannot be packaged");
    let path = dir.join(format!("{name}.json"));
    write_json(&path, asset)?;
    Ok(path)
}

/// 📦 Writes assets, external file metadata and every template file; returns the manifest.
pub fn write(ctx: &MigrationContext, package: &Package, af: &ActionFramework) -> Result<TemplateManifest> {
    let layout = &ctx.layout;
    layout.create()?;
    let mut the_manifest = TemplateManifest::default();

    // -- every CSV is on disk before a single template file is written
    let mut first_files = Vec::with_capacity(package.datasets.len());
    for dataset in &package.datasets {
        let first = dataset
            .files
            .first()
            .cloned()
            .unwrap_or_else(|| layout.external_file(&dataset.target_dataset, "csv"));
        if !first.exists() {
            return Err(SamxError::MissingFile(first).into());
        }
        first_files.push(first);
    }

    for dashboard in &package.dashboards {
        let path = write_asset(&layout.dashboards, dashboard)?;
        the_manifest.dashboards.push(AssetEntry::dashboard(
            str_field(dashboard, "label"),
            str_field(dashboard, "name"),
            relative("dashboards", &path),
        ));
    }
    for component in &package.components {
        let path = write_asset(&layout.components, component)?;
        the_manifest.components.push(AssetEntry::component(
            str_field(component, "label"),
            str_field(component, "name"),
            relative("components", &path),
        ));
    }

    for (dataset, first) in package.datasets.iter().zip(&first_files) {
        let target = &dataset.target_dataset;
        let schema_path = layout.external_file(target, "json");
        write_json(&schema_path, &dataset.schema)?;

        let mut the_xmd = dataset.user_xmd.clone();
        af.wire_user_xmd(target, &mut the_xmd);
        let xmd_path = layout.user_xmd_file(target);
        write_json(&xmd_path, &the_xmd)?;

        the_manifest.external_files.push(ExternalFileEntry {
            label: dataset.label.clone(),
            name: target.clone(),
            condition: manifest::CREATE_ALL_EXTERNAL_FILES.to_string(),
            user_xmd: relative("external_files", &xmd_path),
            file: relative("external_files", first),
            schema: relative("external_files", &schema_path),
            kind: "CSV".to_string(),
        });
    }

    if !af.is_empty() {
        let recipe_name = ActionFramework::recipe_name(&ctx.api_name);
        let path = layout.recipe_file(&recipe_name);
        write_json(&path, &af.recipe(&recipe_name, &ctx.asset_version))?;
        the_manifest
            .recipes
            .push(AssetEntry::recipe(&recipe_name, &recipe_name, relative("recipes", &path)));
    }

    write_json(&layout.template_file("template-info.json"), &the_manifest.template_info(ctx))?;
    write_json(&layout.template_file("folder.json"), &manifest::folder(ctx))?;
    write_json(&layout.template_file("variables.json"), &manifest::variables(af))?;
    write_json(&layout.template_file("ui.json"), &af.ui())?;
    write_json(
        &layout.template_file("template-to-app-rules.json"),
        &manifest::template_to_app_rules(),
    )?;
    if ctx.auto_install {
        write_json(&layout.template_file("auto-install.json"), &manifest::auto_install(ctx))?;
    }

    info!(
        "📦 packaged {} dashboard(s), {} component(s), {} external file(s), {} recipe(s) into {}",
        the_manifest.dashboards.len(),
        the_manifest.components.len(),
        the_manifest.external_files.len(),
        the_manifest.recipes.len(),
        layout.template_dir.display()
    );
    Ok(the_manifest)
}
