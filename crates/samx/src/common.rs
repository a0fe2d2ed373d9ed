//! 📦 Common: the nouns every stage of a migration agrees on.
//!
//! Dashboards and their `state` trees stay as `serde_json::Value`, because
//! the wave schema is large, undocumented in places, and we only touch the
//! parts we know about. Everything the pipeline reasons about (names, ids,
//! datasets, field kinds) gets a real type.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 📅 Every rollup CRM Analytics generates for a date field, appended to the field name.
pub const DATE_PARTS: &[&str] = &[
    "_day_epoch",
    "_sec_epoch",
    "_Second",
    "_Minute",
    "_Hour",
    "_Day",
    "_Week",
    "_Month",
    "_Quarter",
    "_Year",
    "_Week_Fiscal",
    "_Month_Fiscal",
    "_Quarter_Fiscal",
    "_Year_Fiscal",
];

/// 📋 One entry of `sfdx analytics:dashboard:list --json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DashboardSummary {
    #[serde(alias = "dashboardid")]
    pub id: String,
    pub name: String,
    pub label: String,
    #[serde(default, alias = "folderid")]
    pub folder_id: Option<String>,
    #[serde(default, alias = "foldername")]
    pub folder_name: Option<String>,
}

/// 📁 One entry of `sfdx analytics:app:list --json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppSummary {
    #[serde(alias = "folderid")]
    pub id: String,
    pub name: String,
    pub label: String,
}

/// 🗃️ A dataset as the bundle (or the dataset listing) describes it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct DatasetRef {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "currentVersionId", alias = "version")]
    pub version: Option<String>,
    #[serde(default, rename = "userXmd", skip_serializing_if = "Option::is_none")]
    pub user_xmd: Option<Value>,
}

impl DatasetRef {
    pub fn label_or_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// 🎁 The payload of `wave/dashboards/{id}/bundle`: one dashboard and everything it drags along.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DashboardBundle {
    pub asset: Value,
    #[serde(default)]
    pub components: Map<String, Value>,
    #[serde(default)]
    pub datasets: Vec<DatasetRef>,
    #[serde(default)]
    pub xmds: Map<String, Value>,
}

impl DashboardBundle {
    pub fn name(&self) -> &str {
        str_field(&self.asset, "name")
    }

    pub fn label(&self) -> &str {
        str_field(&self.asset, "label")
    }

    /// 🔗 Names of every dashboard this one links to, from its own widgets and its components'.
    pub fn linked_dashboards(&self) -> Vec<String> {
        let mut the_links = Vec::new();
        let the_assets = std::iter::once(&self.asset).chain(self.components.values());
        for asset in the_assets {
            for target in dashboard_links(asset) {
                if !the_links.iter().any(|seen| seen == target) {
                    the_links.push(target.to_string());
                }
            }
        }
        the_links
    }
}

/// 🔎 `destinationLink.name` of every `link` widget whose destination is a dashboard.
pub fn dashboard_links(asset: &Value) -> Vec<&str> {
    let Some(widgets) = asset.pointer("/state/widgets").and_then(Value::as_object) else {
        return Vec::new();
    };
    widgets
        .values()
        .filter(|widget| str_field(widget, "type") == "link")
        .filter(|widget| {
            widget
                .pointer("/parameters/destinationType")
                .and_then(Value::as_str)
                == Some("dashboard")
        })
        .filter_map(|widget| {
            widget
                .pointer("/parameters/destinationLink/name")
                .and_then(Value::as_str)
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// 🧺 All bundles of a run folded into one. Keys are names except `xmds`, which is keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MergedBundle {
    pub dashboards: BTreeMap<String, Value>,
    pub components: BTreeMap<String, Value>,
    pub datasets: BTreeMap<String, DatasetRef>,
    pub xmds: BTreeMap<String, Value>,
}

impl MergedBundle {
    /// 🧺 Later bundles overwrite earlier ones on key collisions. Shared datasets land once.
    pub fn merge<'a>(bundles: impl IntoIterator<Item = &'a DashboardBundle>) -> Self {
        let mut merged = MergedBundle::default();
        for bundle in bundles {
            for (id, xmd) in &bundle.xmds {
                merged.xmds.insert(id.clone(), xmd.clone());
            }
            for (key, component) in &bundle.components {
                let the_name = match str_field(component, "name") {
                    "" => key.clone(),
                    name => name.to_string(),
                };
                merged.components.insert(the_name, component.clone());
            }
            for dataset in &bundle.datasets {
                merged.datasets.insert(dataset.name.clone(), dataset.clone());
            }
            if !bundle.name().is_empty() {
                merged
                    .dashboards
                    .insert(bundle.name().to_string(), bundle.asset.clone());
            }
        }
        merged
    }

    /// 🧬 The `main` xmd of a dataset, if the bundle shipped one.
    pub fn main_xmd(&self, dataset: &DatasetRef) -> Option<&Value> {
        self.xmds
            .get(&dataset.id)
            .filter(|xmd| matches!(str_field(xmd, "type"), "main" | ""))
    }

    /// 🧬 The xmd that belongs to a dashboard or component asset (keyed by the asset id).
    pub fn asset_xmd(&self, asset: &Value) -> Option<&Value> {
        self.xmds.get(str_field(asset, "id"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Date,
    Dimension,
    Measure,
}

/// 🏷️ One dataset field as the main xmd describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub decimal_digits: u32,
    pub date_format: Option<String>,
    pub fiscal_month_offset: Option<i64>,
}

/// 📚 The typed field inventory of one dataset. Date rollups are folded into their date field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetFields {
    pub dataset: String,
    pub fields: Vec<FieldSpec>,
}

impl DatasetFields {
    pub fn from_main_xmd(dataset: &str, xmd: &Value) -> Self {
        let mut the_rollups: HashSet<String> = HashSet::new();
        let mut fields: Vec<FieldSpec> = Vec::new();

        for date in array_field(xmd, "dates") {
            let Some(full) = date.pointer("/fields/fullField").and_then(Value::as_str) else {
                continue;
            };
            the_rollups.insert(full.to_string());
            for part in DATE_PARTS {
                the_rollups.insert(format!("{full}{part}"));
            }
            fields.push(FieldSpec {
                name: full.to_string(),
                label: label_or(date, full),
                kind: FieldKind::Date,
                decimal_digits: 0,
                date_format: date
                    .get("format")
                    .and_then(Value::as_str)
                    .filter(|format| !format.is_empty())
                    .map(str::to_owned),
                fiscal_month_offset: date.get("fiscalMonthOffset").and_then(Value::as_i64),
            });
        }

        for (key, kind) in [
            ("dimensions", FieldKind::Dimension),
            ("measures", FieldKind::Measure),
        ] {
            for entry in array_field(xmd, key) {
                let Some(name) = entry.get("field").and_then(Value::as_str) else {
                    continue;
                };
                // -- rollups and duplicates ride along with whoever got there first
                if the_rollups.contains(name) || fields.iter().any(|f| f.name == name) {
                    continue;
                }
                let decimal_digits = entry
                    .pointer("/format/decimalDigits")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                fields.push(FieldSpec {
                    name: name.to_string(),
                    label: label_or(entry, name),
                    kind,
                    decimal_digits,
                    date_format: None,
                    fiscal_month_offset: None,
                });
            }
        }

        Self {
            dataset: dataset.to_string(),
            fields,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// 🩹 `value[key]` as a `&str`, or `""` if it is missing or not a string.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// 🩹 `value[key]` as a slice, or empty.
pub(crate) fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn label_or(entry: &Value, fallback: &str) -> String {
    match str_field(entry, "label") {
        "" => fallback.to_string(),
        label => label.to_string(),
    }
}
