//! 🎬 Action Framework: quick actions and "open record" on dashboard rows.
//!
//! For every (dataset, dimension) the operator picks, the template gets:
//!
//! - a `zAction_Framework_ID_<n>` variable the installer prompts for
//! - a formula node in the `<api>_af` recipe that writes that variable into a
//!   column of the same name
//! - a `recordIdField` on the dimension in the dataset's user xmd
//!
//! One recipe stream per dataset: `LOAD_<ds>` → `NODE_1_<ds>` → ... →
//! `NODE_<k>_<ds>` → `SAVE_<ds>`. The recipe UI shows the formula chain as one
//! `TRANSFORM_<ds>` node whose internal connectors are consecutive pairs.

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::decisions::{DatasetDimensions, UserDecisionPort};

const VARIABLE_PREFIX: &str = "zAction_Framework_ID_";

/// 🎯 One picked dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionField {
    /// 🏷️ target dataset name (suffixed)
    pub dataset: String,
    /// 📏 cleaned dimension name
    pub field: String,
    /// 🔑 `zAction_Framework_ID_<n>`, numbered across the whole run
    pub variable: String,
    /// 🔢 position within its dataset's formula chain, from 1
    pub position: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFramework {
    fields: Vec<ActionField>,
}

impl ActionFramework {
    /// 🙋 Asks until the operator is done. Picks that name no known dataset or
    /// dimension are skipped with a warning, repeats are ignored.
    pub fn collect(
        decisions: &mut dyn UserDecisionPort,
        datasets: &[DatasetDimensions],
    ) -> Result<Self> {
        let mut af = Self::default();
        if datasets.iter().all(|ds| ds.dimensions.is_empty()) {
            return Ok(af);
        }
        while let Some((dataset, field)) = decisions.next_action_field(datasets)? {
            let Some(known) = datasets.iter().find(|ds| ds.dataset == dataset) else {
                warn!("🎬 no dataset called '{dataset}' in this package, skipping");
                continue;
            };
            if !known.dimensions.iter().any(|dimension| *dimension == field) {
                warn!("🎬 '{dataset}' has no dimension '{field}', skipping");
                continue;
            }
            if af.fields.iter().any(|f| f.dataset == dataset && f.field == field) {
                continue;
            }
            af.push(dataset, field);
        }
        if !af.is_empty() {
            info!("🎬 Action Framework on {} field(s)", af.fields.len());
        }
        Ok(af)
    }

    fn push(&mut self, dataset: String, field: String) {
        let position = self.fields.iter().filter(|f| f.dataset == dataset).count() + 1;
        let variable = format!("{VARIABLE_PREFIX}{}", self.fields.len() + 1);
        self.fields.push(ActionField {
            dataset,
            field,
            variable,
            position,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[ActionField] {
        &self.fields
    }

    pub fn recipe_name(api_name: &str) -> String {
        format!("{api_name}_af")
    }

    /// 🗂️ Datasets in the order they were first picked.
    fn datasets(&self) -> Vec<&str> {
        let mut the_datasets: Vec<&str> = Vec::new();
        for field in &self.fields {
            if !the_datasets.contains(&field.dataset.as_str()) {
                the_datasets.push(&field.dataset);
            }
        }
        the_datasets
    }

    fn fields_of<'a>(&'a self, dataset: &'a str) -> impl Iterator<Item = &'a ActionField> + 'a {
        self.fields.iter().filter(move |f| f.dataset == dataset)
    }

    /// 🔑 One string variable per field.
    pub fn variables(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|field| {
                let variable = json!({
                    "label": format!("Salesforce Record Id for {}.{}", field.dataset, field.field),
                    "description": "Quick actions and Open Record on every row use this record id.",
                    "defaultValue": "",
                    "required": false,
                    "excludeSelected": false,
                    "excludes": [],
                    "variableType": {"type": "StringType"}
                });
                (field.variable.clone(), variable)
            })
            .collect()
    }

    /// 🖥️ One wizard page listing every variable, or `{}` without fields.
    pub fn ui(&self) -> Value {
        if self.is_empty() {
            return json!({});
        }
        let variables: Vec<Value> = self
            .fields
            .iter()
            .map(|field| json!({"name": field.variable}))
            .collect();
        json!({
            "pages": [{
                "title": "Instant Action Framework",
                "variables": variables
            }]
        })
    }

    /// 🍳 The `<api>_af` recipe: one load → formulas → save stream per dataset.
    pub fn recipe(&self, recipe_name: &str, asset_version: &str) -> Value {
        let mut nodes = Map::new();
        let mut ui_nodes = Map::new();
        let mut connectors: Vec<Value> = Vec::new();

        for (row, dataset) in self.datasets().into_iter().enumerate() {
            let top = 112 + 140 * row;
            let load = format!("LOAD_{dataset}");
            let transform = format!("TRANSFORM_{dataset}");
            let save = format!("SAVE_{dataset}");

            nodes.insert(
                load.clone(),
                json!({
                    "action": "load",
                    "sources": [],
                    "parameters": {
                        "fields": [],
                        "dataset": {
                            "type": "analyticsDataset",
                            "label": dataset,
                            "name": format!("${{App.Datasets.{dataset}.Name}}")
                        },
                        "sampleDetails": {"type": "TopN", "sortBy": []}
                    }
                }),
            );

            let mut previous = load.clone();
            let mut graph = Map::new();
            let mut chain: Vec<String> = Vec::new();
            for field in self.fields_of(dataset) {
                let node = format!("NODE_{}_{dataset}", field.position);
                nodes.insert(
                    node.clone(),
                    json!({
                        "action": "formula",
                        "sources": [previous],
                        "parameters": {
                            "expressionType": "SQL",
                            "fields": [{
                                "type": "TEXT",
                                "name": field.variable,
                                "label": field.variable,
                                "formulaExpression": format!("${{Variables.{}}}", field.variable),
                                "precision": 255,
                                "defaultValue": ""
                            }]
                        }
                    }),
                );
                graph.insert(
                    node.clone(),
                    json!({"parameters": {"type": "BASE_FORMULA_UI"}, "label": field.field}),
                );
                chain.push(node.clone());
                previous = node;
            }
            let inner: Vec<Value> = chain
                .windows(2)
                .map(|pair| json!({"source": pair[0], "target": pair[1]}))
                .collect();

            nodes.insert(
                save.clone(),
                json!({
                    "action": "save",
                    "sources": [previous],
                    "parameters": {
                        "fields": [],
                        "dataset": {
                            "type": "analyticsDataset",
                            "label": dataset,
                            "name": dataset,
                            "folderName": "${App.Folder.FullyQualifiedName}"
                        }
                    }
                }),
            );

            ui_nodes.insert(
                load.clone(),
                json!({"label": dataset, "type": "LOAD_DATASET", "top": top, "left": 112, "parameters": {"sampleSize": 2000}}),
            );
            ui_nodes.insert(
                transform.clone(),
                json!({
                    "label": "Action Framework",
                    "description": "",
                    "type": "TRANSFORM",
                    "top": top,
                    "left": 252,
                    "graph": graph,
                    "connectors": inner
                }),
            );
            ui_nodes.insert(
                save.clone(),
                json!({"label": format!("Save {dataset}"), "type": "OUTPUT", "top": top, "left": 392}),
            );
            connectors.push(json!({"source": load, "target": transform}));
            connectors.push(json!({"source": transform, "target": save}));
        }

        json!({
            "name": recipe_name,
            "label": recipe_name,
            "format": "R3",
            "recipeDefinition": {
                "version": asset_version,
                "nodes": nodes,
                "ui": {
                    "nodes": ui_nodes,
                    "connectors": connectors,
                    "hiddenColumns": []
                }
            }
        })
    }

    /// 🧬 Points the picked dimensions of `dataset` at their record id column.
    ///
    /// Whatever actions the dimension had before are cleared; dimensions the
    /// xmd never mentioned are appended.
    pub fn wire_user_xmd(&self, dataset: &str, xmd: &mut Value) {
        let Some(map) = xmd.as_object_mut() else {
            return;
        };
        let dimensions = map
            .entry("dimensions")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(dimensions) = dimensions.as_array_mut() else {
            return;
        };
        for field in self.fields_of(dataset) {
            let wiring = [
                ("linkTemplate", json!("")),
                ("linkTooltip", json!("")),
                ("salesforceActions", json!([])),
                ("recordIdField", json!(field.variable)),
                ("linkTemplateEnabled", json!(true)),
                ("salesforceActionsEnabled", json!(true)),
            ];
            let existing = dimensions
                .iter_mut()
                .filter_map(Value::as_object_mut)
                .find(|dimension| dimension.get("field").and_then(Value::as_str) == Some(field.field.as_str()));
            match existing {
                Some(dimension) => {
                    for (key, value) in wiring {
                        dimension.insert(key.into(), value);
                    }
                }
                None => {
                    let mut dimension = Map::new();
                    dimension.insert("field".into(), json!(field.field));
                    for (key, value) in wiring {
                        dimension.insert(key.into(), value);
                    }
                    dimensions.push(Value::Object(dimension));
                }
            }
        }
    }
}
