//! 🚀 Install: the template goes to the destination org.
//!
//! 1. log in (the configured org, or a browser login)
//! 2. auto-install only: fill in the Action Framework variables, patch them
//!    into the recipe and record them in `auto-install.json`
//! 3. `force:source:deploy` from the project root
//! 4. auto-install and open the new app, or explain the manual steps and open
//!    Analytics Studio once the operator says so
//!
//! Nothing is rolled back on failure. The template folder stays where it is.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::backends::SfdxCli;
use crate::context::MigrationContext;
use crate::decisions::UserDecisionPort;
use crate::packager::{self, ActionFramework};

/// 🔧 The `[destination]` table of the config file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DestinationConfig {
    /// 🔑 sfdx alias or username; a browser login happens when absent
    #[serde(default)]
    pub target_org: Option<String>,
    /// 🗝️ pre-collected answers for auto-install variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub username: String,
    /// 🆔 the app the auto-install created
    pub app_id: Option<String>,
    /// 🌐 whether Analytics Studio was opened
    pub opened: bool,
}

/// 🔑 Every Action Framework variable, from config first, then from the operator.
fn collect_values(
    af: &ActionFramework,
    configured: &BTreeMap<String, String>,
    decisions: &mut dyn UserDecisionPort,
) -> Result<BTreeMap<String, String>> {
    let mut the_values = BTreeMap::new();
    for field in af.fields() {
        let value = match configured.get(&field.variable) {
            Some(value) => value.clone(),
            None => {
                let label = format!("Salesforce Record Id for {}.{}", field.dataset, field.field);
                decisions.variable_value(&field.variable, &label)?
            }
        };
        the_values.insert(field.variable.clone(), value);
    }
    Ok(the_values)
}

/// 🩹 `${Variables.<k>}` → value, in the recipe text. Values are JSON-escaped, the
/// placeholders only ever sit inside string literals.
fn patch_recipe(text: &str, values: &BTreeMap<String, String>) -> Result<String> {
    values.iter().try_fold(text.to_string(), |text, (name, value)| {
        let quoted = serde_json::to_string(value)
            .with_context(|| format!("💀 Could not escape the value of {name}"))?;
        let escaped = &quoted[1..quoted.len() - 1];
        Ok(text.replace(&format!("${{Variables.{name}}}"), escaped))
    })
}

fn prepare_auto_install(
    ctx: &MigrationContext,
    af: &ActionFramework,
    values: &BTreeMap<String, String>,
) -> Result<()> {
    if !af.is_empty() {
        let recipe_path = ctx
            .layout
            .recipe_file(&ActionFramework::recipe_name(&ctx.api_name));
        let text = fs::read_to_string(&recipe_path)
            .with_context(|| format!("💀 The Action Framework recipe {} is gone", recipe_path.display()))?;
        fs::write(&recipe_path, patch_recipe(&text, values)?)
            .with_context(|| format!("💀 Could not patch {}", recipe_path.display()))?;
    }

    let auto_install_path = ctx.layout.template_file("auto-install.json");
    let mut auto_install = packager::read_json(&auto_install_path)?;
    if let Some(configuration) = auto_install.pointer_mut("/configuration/appConfiguration") {
        if let Some(map) = configuration.as_object_mut() {
            let values = values
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert("values".into(), Value::Object(values));
        }
    }
    packager::write_json(&auto_install_path, &auto_install)
}

pub async fn install(
    sfdx: &SfdxCli,
    config: &DestinationConfig,
    ctx: &MigrationContext,
    af: &ActionFramework,
    decisions: &mut dyn UserDecisionPort,
) -> Result<InstallOutcome> {
    let template = &ctx.api_name;
    let username = match &config.target_org {
        Some(org) => org.clone(),
        None => {
            info!("🌍 destination org next");
            sfdx.login().await?.username
        }
    };

    if ctx.auto_install {
        let values = collect_values(af, &config.variables, decisions)?;
        prepare_auto_install(ctx, af, &values)?;
    }

    info!("🚚 deploying {template} to {username}");
    sfdx.deploy(&username, template, &ctx.layout.project_root)
        .await
        .with_context(|| format!("💀 Deploy of {template} failed. The template is still at {}", ctx.layout.template_dir.display()))?;

    if ctx.auto_install {
        let app_id = sfdx.autoinstall(&username, template).await?;
        info!("🤖 auto-install of {template} started, app {app_id}. Analytics Studio opens next");
        sfdx.org_open(&username, &format!("analytics/application/{app_id}/edit"))
            .await?;
        return Ok(InstallOutcome {
            username,
            app_id: Some(app_id),
            opened: true,
        });
    }

    info!(
        "📋 manual install: in Analytics Studio pick Create > App, search the gallery for '{template}', \
        select it, Continue twice, name the app and Create. Refresh once Application Complete shows up."
    );
    let opened = decisions.confirm_install(template)?;
    if opened {
        sfdx.org_open(&username, "analytics").await?;
    }
    Ok(InstallOutcome {
        username,
        app_id: None,
        opened,
    })
}
