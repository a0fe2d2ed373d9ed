//! 📜 `template-info.json` and the small JSON files that travel with it.

use serde::Serialize;
use serde_json::{Map, Value, json};

use super::action_framework::ActionFramework;
use crate::context::MigrationContext;

pub const CREATE_ALL_DASHBOARDS: &str = "${Variables.Overrides.createAllDashboards}";
pub const CREATE_ALL_COMPONENTS: &str = "${Variables.Overrides.createAllComponents}";
pub const CREATE_ALL_EXTERNAL_FILES: &str = "${Variables.Overrides.createAllExternalFiles}";
pub const CREATE_ALL_RECIPES: &str = "${Variables.Overrides.createAllRecipes}";

const OVERRIDE_FLAGS: &[&str] = &[
    "createAllDashboards",
    "createAllComponents",
    "createAllExternalFiles",
    "createAllRecipes",
];

const DESCRIPTION: &str = "CRM Analytics migration template, built for a fully automated install";

/// 📋 A dashboard, component or recipe line of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    pub label: String,
    pub name: String,
    pub file: String,
    pub condition: String,
}

impl AssetEntry {
    fn new(label: &str, name: &str, file: String, condition: &str) -> Self {
        Self {
            label: label.to_string(),
            name: name.to_string(),
            file,
            condition: condition.to_string(),
        }
    }

    pub fn dashboard(label: &str, name: &str, file: String) -> Self {
        Self::new(label, name, file, CREATE_ALL_DASHBOARDS)
    }

    pub fn component(label: &str, name: &str, file: String) -> Self {
        Self::new(label, name, file, CREATE_ALL_COMPONENTS)
    }

    pub fn recipe(label: &str, name: &str, file: String) -> Self {
        Self::new(label, name, file, CREATE_ALL_RECIPES)
    }
}

/// 📄 An `externalFiles` line: the CSV, its schema and its user xmd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFileEntry {
    pub label: String,
    pub name: String,
    pub condition: String,
    pub user_xmd: String,
    pub file: String,
    pub schema: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// 📜 What the template ships, built once from the fully rewritten run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateManifest {
    pub dashboards: Vec<AssetEntry>,
    pub components: Vec<AssetEntry>,
    pub external_files: Vec<ExternalFileEntry>,
    pub recipes: Vec<AssetEntry>,
}

/// 📐 `"58.0"` goes out as the number the installer expects; anything odd goes out as written.
fn asset_version(ctx: &MigrationContext) -> Value {
    ctx.asset_version
        .parse::<f64>()
        .map(|version| json!(version))
        .unwrap_or_else(|_| json!(ctx.asset_version))
}

impl TemplateManifest {
    pub fn template_info(&self, ctx: &MigrationContext) -> Value {
        let mut info = json!({
            "templateType": "app",
            "label": ctx.label,
            "name": ctx.api_name,
            "namespace": "",
            "description": DESCRIPTION,
            "assetVersion": asset_version(ctx),
            "variableDefinition": "variables.json",
            "uiDefinition": "ui.json",
            "folderDefinition": "folder.json",
            "rules": [{"type": "templateToApp", "file": "template-to-app-rules.json"}],
            "releaseInfo": {"templateVersion": "1.0", "notesFile": null},
            "externalFiles": self.external_files,
            "dashboards": self.dashboards,
            "components": self.components,
            "recipes": self.recipes,
            "lenses": [],
            "eltDataflows": [],
            "datasetFiles": [],
            "storedQueries": [],
            "imageFiles": [],
            "extendedTypes": {},
            "templateDependencies": [],
            "icons": {
                "appBadge": {"name": "16.png"},
                "templateBadge": {"name": "default.png"}
            }
        });
        if ctx.auto_install {
            if let Some(map) = info.as_object_mut() {
                map.insert("autoInstallDefinition".into(), json!("auto-install.json"));
            }
        }
        info
    }
}

pub fn folder(ctx: &MigrationContext) -> Value {
    json!({"name": ctx.api_name, "label": ctx.label})
}

pub fn sfdx_project() -> Value {
    json!({
        "packageDirectories": [{"path": "force-app", "default": true}],
        "name": "samx",
        "namespace": "",
        "sfdcLoginUrl": "https://login.salesforce.com",
        "sourceApiVersion": "58.0"
    })
}

/// 🎛️ `Overrides` (everything on by default), then one variable per Action Framework field.
pub fn variables(af: &ActionFramework) -> Value {
    let flags: Map<String, Value> = OVERRIDE_FLAGS
        .iter()
        .map(|flag| (flag.to_string(), json!(true)))
        .collect();
    let properties: Map<String, Value> = OVERRIDE_FLAGS
        .iter()
        .map(|flag| (flag.to_string(), json!({"type": "BooleanType", "enums": [true, false]})))
        .collect();

    let mut the_variables = Map::new();
    the_variables.insert(
        "Overrides".into(),
        json!({
            "label": "Overrides",
            "description": "Internal use only. Decides which assets get created.",
            "defaultValue": flags,
            "required": false,
            "excludeSelected": false,
            "excludes": [],
            "variableType": {
                "type": "ObjectType",
                "required": [],
                "properties": properties,
                "strictValidation": true
            }
        }),
    );
    the_variables.extend(af.variables());
    Value::Object(the_variables)
}

pub fn template_to_app_rules() -> Value {
    json!({"constants": [], "macros": [], "rules": []})
}

/// 🤖 The installer reads `values` when it runs unattended; install fills them in.
pub fn auto_install(ctx: &MigrationContext) -> Value {
    json!({
        "hooks": [],
        "configuration": {
            "appConfiguration": {
                "autoShareWithLicensedUsers": false,
                "autoShareWithOriginator": true,
                "deleteAppOnConstructionFailure": false,
                "appLabel": ctx.label,
                "values": {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TemplateConfig;
    use crate::decisions::{DatasetDimensions, ScriptedDecisions};

    fn a_context(auto_install: bool) -> MigrationContext {
        let config = TemplateConfig {
            suffix: Some("_ABC".into()),
            ..Default::default()
        };
        MigrationContext::new(&config, "Sales".into(), auto_install)
    }

    #[test]
    fn the_one_where_every_line_carries_its_override() {
        let manifest = TemplateManifest {
            dashboards: vec![AssetEntry::dashboard("Pipeline", "Pipeline_ABC", "dashboards/Pipeline_ABC.json".into())],
            external_files: vec![ExternalFileEntry {
                label: "Opportunity".into(),
                name: "Opportunity_ABC".into(),
                condition: CREATE_ALL_EXTERNAL_FILES.into(),
                user_xmd: "external_files/Opportunity_ABC_XMD.json".into(),
                file: "external_files/Opportunity_ABC.csv__PART__1".into(),
                schema: "external_files/Opportunity_ABC.json".into(),
                kind: "CSV".into(),
            }],
            ..Default::default()
        };
        let info = manifest.template_info(&a_context(false));
        assert_eq!(info["assetVersion"], json!(58.0));
        assert_eq!(info["dashboards"][0]["condition"], CREATE_ALL_DASHBOARDS);
        assert_eq!(info["externalFiles"][0]["userXmd"], "external_files/Opportunity_ABC_XMD.json");
        assert_eq!(info["externalFiles"][0]["type"], "CSV");
        assert!(info.get("autoInstallDefinition").is_none());
        assert_eq!(info["releaseInfo"]["templateVersion"], "1.0");
    }

    #[test]
    fn the_one_where_overrides_sit_next_to_the_action_variables() -> anyhow::Result<()> {
        let mut decisions = ScriptedDecisions {
            action_fields: [("Opportunity_ABC".to_string(), "AccountId".to_string())].into(),
            ..Default::default()
        };
        let datasets = [DatasetDimensions {
            dataset: "Opportunity_ABC".into(),
            dimensions: vec!["AccountId".into()],
        }];
        let af = ActionFramework::collect(&mut decisions, &datasets)?;

        let the_variables = variables(&af);
        assert_eq!(the_variables["Overrides"]["defaultValue"]["createAllRecipes"], true);
        assert_eq!(
            the_variables["zAction_Framework_ID_1"]["variableType"]["type"],
            "StringType"
        );
        Ok(())
    }
}
