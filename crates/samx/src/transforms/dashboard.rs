//! 🗺️ Dashboard rewriting: a typed walk over `state`.
//!
//! Every asset (dashboard or component) goes through [`AssetRewriter::rewrite`]
//! once. Steps, widgets and filters are classified into [`StepNode`],
//! [`WidgetNode`] and [`FilterNode`] and each kind gets its own rule; anything
//! unclassified is left alone. Two jobs happen on the way:
//!
//! - **field renames** through the [`FieldRewriter`] of the datasets a step reads
//! - **reference virtualization**: dataset, component, dashboard and folder
//!   references become `${App...}` expressions the installer resolves
//!
//! SOQL steps are never touched: their field names belong to the source org,
//! not to any exported dataset.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::names::FieldRenameMap;
use super::substitution::FieldRewriter;
use super::tokens::{dotted, protect, restore};
use super::xmd;
use crate::common::str_field;

/// 🗑️ Top-level asset keys the destination assigns on install.
pub const VOLATILE_ASSET_KEYS: &[&str] = &[
    "createdBy",
    "createdDate",
    "datasets",
    "files",
    "historiesUrl",
    "id",
    "lastAccessedDate",
    "lastModifiedBy",
    "lastModifiedDate",
    "permissions",
    "refreshDate",
    "templateAssetSourceName",
    "templateSourceId",
    "type",
    "url",
    "visibility",
    "allowPreview",
    "assetSharingUrl",
];

const VOLATILE_FOLDER_KEYS: &[&str] = &["label", "name", "url"];

/// 🔒 Parameter keys that hold asset names, not field names.
const NAME_PARAMETERS: &[&str] = &["step", "source", "destinationLink", "destinationType"];

/// 🔑 Maps whose keys are field names: initial selections and per-column settings.
const FIELD_KEYED_MAPS: &[&str] = &["start", "columnProperties"];

/// 📝 SAQL step keys with their own handling; every other key is field-renamed.
const SAQL_OWN_KEYS: &[&str] = &["query", "datasets", "type", "start"];

pub const FOLDER_ID: &str = "${App.Folder.Id}";
pub const ORG_NAMESPACE: &str = "${Org.Namespace}";

/// 📇 What ends up in the package, by original name → label.
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    pub dashboards: BTreeMap<String, String>,
    pub components: BTreeMap<String, String>,
}

impl PackageIndex {
    pub fn dashboard_reference(&self, name: &str) -> Option<String> {
        self.dashboards
            .get(name)
            .map(|label| format!("${{App.Dashboards['{label}'].Name}}"))
    }

    pub fn component_reference(&self, name: &str) -> Option<String> {
        self.components
            .get(name)
            .map(|label| format!("${{App.Components['{label}'].Name}}"))
    }
}

pub enum StepNode<'a> {
    Saql(&'a mut Map<String, Value>),
    Soql,
    /// `aggregateflex` and `grain`: a structured query over `query.sources`
    Aggregate(&'a mut Map<String, Value>),
    StaticFlex(&'a mut Map<String, Value>),
    Other(&'a mut Map<String, Value>),
}

impl<'a> StepNode<'a> {
    pub fn classify(step: &'a mut Map<String, Value>) -> Self {
        match step.get("type").and_then(Value::as_str).unwrap_or_default() {
            "saql" => Self::Saql(step),
            "soql" => Self::Soql,
            "aggregateflex" | "grain" => Self::Aggregate(step),
            "staticflex" => Self::StaticFlex(step),
            _ => Self::Other(step),
        }
    }
}

pub enum LinkDestination {
    Dashboard,
    Component,
    Lens,
    Other,
}

pub enum WidgetNode<'a> {
    Component(&'a mut Map<String, Value>),
    Link(LinkDestination, &'a mut Map<String, Value>),
    Chart(&'a mut Map<String, Value>),
    FilterPanel(&'a mut Map<String, Value>),
    /// `image` and `container`: their uploaded image does not travel
    Picture(&'a mut Map<String, Value>),
    Other(&'a mut Map<String, Value>),
}

impl<'a> WidgetNode<'a> {
    /// 🏷️ Classifies by `type`; `parameters` is what the variant carries.
    pub fn classify(widget: &'a mut Value) -> Option<Self> {
        let kind = str_field(widget, "type").to_string();
        let parameters = widget.get_mut("parameters")?.as_object_mut()?;
        Some(match kind.as_str() {
            "component" => Self::Component(parameters),
            "link" => {
                let destination = match parameters
                    .get("destinationType")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                {
                    "dashboard" => LinkDestination::Dashboard,
                    "component" => LinkDestination::Component,
                    "lens" => LinkDestination::Lens,
                    _ => LinkDestination::Other,
                };
                Self::Link(destination, parameters)
            }
            "chart" => Self::Chart(parameters),
            "filterpanel" => Self::FilterPanel(parameters),
            "image" | "container" => Self::Picture(parameters),
            _ => Self::Other(parameters),
        })
    }
}

/// 🧹 A dashboard-level filter: one dataset, a list of its fields.
pub struct FilterNode<'a> {
    pub dataset: String,
    pub filter: &'a mut Map<String, Value>,
}

impl<'a> FilterNode<'a> {
    pub fn classify(filter: &'a mut Value) -> Option<Self> {
        let filter = filter.as_object_mut()?;
        let dataset = filter
            .get("dataset")
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)?
            .to_string();
        Some(Self { dataset, filter })
    }
}

/// ✍️ Rewrites one asset at a time for one run.
pub struct AssetRewriter<'a> {
    suffix: &'a str,
    plans: &'a FieldRenameMap,
    index: &'a PackageIndex,
    /// 🧰 one rewriter per dataset, plus the union under `""`
    by_dataset: HashMap<String, FieldRewriter>,
}

impl<'a> AssetRewriter<'a> {
    pub fn new(suffix: &'a str, plans: &'a FieldRenameMap, index: &'a PackageIndex) -> Self {
        let mut by_dataset: HashMap<String, FieldRewriter> = plans
            .plans()
            .map(|plan| (plan.dataset.clone(), FieldRewriter::new(plan.renames())))
            .collect();
        by_dataset.insert(
            String::new(),
            FieldRewriter::new(plans.plans().flat_map(|plan| plan.renames())),
        );
        Self {
            suffix,
            plans,
            index,
            by_dataset,
        }
    }

    /// 🏗️ `${App.Datasets.<target>.<attribute>}`, with protected periods.
    fn dataset_expression(&self, dataset: &str, attribute: &str) -> String {
        let target = match self.plans.plan(dataset) {
            Some(plan) => plan.target_dataset.clone(),
            None => format!("{dataset}{}", self.suffix),
        };
        format!("${{{}}}", dotted(&["App", "Datasets", &target, attribute]))
    }

    fn dataset_name(&self, dataset: &str) -> String {
        restore(&self.dataset_expression(dataset, "Name"))
    }

    fn rewriter_for(&self, datasets: &[String]) -> FieldRewriter {
        match datasets {
            [] => self.union().clone(),
            [only] => self.by_dataset.get(only).cloned().unwrap_or_default(),
            many => FieldRewriter::new(
                many.iter()
                    .filter_map(|ds| self.plans.plan(ds))
                    .flat_map(|plan| plan.renames()),
            ),
        }
    }

    fn union(&self) -> &FieldRewriter {
        &self.by_dataset[""]
    }

    fn single(&self, dataset: &str) -> Option<&FieldRewriter> {
        self.by_dataset.get(dataset)
    }

    /// 🚀 Rewrites `asset` in place and returns the warnings it produced.
    pub fn rewrite(&self, asset: &mut Value, asset_xmd: Option<&Value>) -> Vec<String> {
        let mut warnings = Vec::new();
        let asset_name = str_field(asset, "name").to_string();
        let asset_datasets: Vec<String> = crate::common::array_field(asset, "datasets")
            .iter()
            .map(|ds| str_field(ds, "name").to_string())
            .filter(|name| !name.is_empty())
            .collect();
        let asset_rewriter = self.rewriter_for(&asset_datasets);

        let mut step_rewriters: HashMap<String, FieldRewriter> = HashMap::new();
        if let Some(Value::Object(state)) = asset.get_mut("state") {
            if let Some(Value::Object(steps)) = state.get_mut("steps") {
                for (step_name, step) in steps.iter_mut() {
                    let Some(step) = step.as_object_mut() else {
                        continue;
                    };
                    let rewriter = self.step(step, &asset_datasets, &asset_rewriter);
                    step_rewriters.insert(step_name.clone(), rewriter);
                }
            }
            if let Some(Value::Object(widgets)) = state.get_mut("widgets") {
                for (widget_name, widget) in widgets.iter_mut() {
                    let step_of_widget = widget
                        .pointer("/parameters/step")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let rewriter = step_rewriters
                        .get(&step_of_widget)
                        .unwrap_or(&asset_rewriter);
                    if let Some(node) = WidgetNode::classify(widget) {
                        if let Some(warning) = self.widget(node, rewriter, &asset_name, widget_name) {
                            warn!("🔗 {warning}");
                            warnings.push(warning);
                        }
                    }
                }
            }
            if let Some(Value::Array(filters)) = state.get_mut("filters") {
                for filter in filters.iter_mut().filter_map(FilterNode::classify) {
                    self.filter(filter);
                }
            }
            if let Some(Value::Array(links)) = state.get_mut("dataSourceLinks") {
                for link in links.iter_mut().filter_map(Value::as_object_mut) {
                    self.data_source_link(link);
                }
            }
        }

        self.metadata(asset, asset_xmd, &asset_rewriter);
        warnings
    }

    fn step(
        &self,
        step: &mut Map<String, Value>,
        asset_datasets: &[String],
        asset_rewriter: &FieldRewriter,
    ) -> FieldRewriter {
        let mut step_datasets: Vec<String> = step
            .get("datasets")
            .and_then(Value::as_array)
            .map(|datasets| {
                datasets
                    .iter()
                    .map(|ds| str_field(ds, "name").to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(Value::Array(sources)) = step.get("query").and_then(|q| q.get("sources")) {
            for source in sources {
                let name = str_field(source, "name");
                if !name.is_empty() && !step_datasets.iter().any(|seen| seen == name) {
                    step_datasets.push(name.to_string());
                }
            }
        }
        let rewriter = if step_datasets.is_empty() {
            asset_rewriter.clone()
        } else {
            self.rewriter_for(&step_datasets)
        };

        match StepNode::classify(step) {
            StepNode::Soql => return FieldRewriter::default(),
            StepNode::Saql(step) => {
                let loadable: &[String] = if step_datasets.is_empty() {
                    asset_datasets
                } else {
                    &step_datasets
                };
                match step.get_mut("query") {
                    Some(Value::String(query)) => *query = self.saql(query, loadable, &rewriter),
                    Some(query) => rewriter.value(query),
                    None => {}
                }
                // -- groups, strings, numbers, selectMode options and friends
                for (key, value) in step.iter_mut() {
                    if !SAQL_OWN_KEYS.contains(&key.as_str()) {
                        rewriter.value(value);
                    }
                }
                rename_field_keys(step, &rewriter);
                self.step_datasets(step);
            }
            StepNode::Aggregate(step) => {
                rename_field_keys(step, &rewriter);
                if let Some(query) = step.get_mut("query") {
                    rewriter.value(query);
                    if let Some(Value::Array(sources)) = query.get_mut("sources") {
                        for source in sources.iter_mut().filter_map(Value::as_object_mut) {
                            if let Some(Value::String(name)) = source.get_mut("name") {
                                *name = self.dataset_name(name);
                            }
                        }
                    }
                }
                self.step_datasets(step);
            }
            StepNode::StaticFlex(step) => {
                if let Some(Value::Object(columns)) = step.get_mut("columns") {
                    for column in columns.values_mut() {
                        let Some(name) = column
                            .pointer("/dataset/name")
                            .and_then(Value::as_str)
                            .map(str::to_owned)
                        else {
                            continue;
                        };
                        column["dataset"] = json!({"name": self.dataset_name(&name)});
                    }
                }
            }
            StepNode::Other(step) => {
                rename_field_keys(step, &rewriter);
                if let Some(query) = step.get_mut("query") {
                    rewriter.value(query);
                }
                self.step_datasets(step);
            }
        }
        rewriter
    }

    /// 📝 Field renames, then `load "<ds>"` → `load "${App.Datasets.<ds>.FullyQualifiedName}"`.
    fn saql(&self, query: &str, loadable: &[String], rewriter: &FieldRewriter) -> String {
        let mut parked = protect(query);
        for dataset in loadable {
            let the_load = format!("load \"{}\"", protect(dataset));
            if parked.contains(&the_load) {
                let the_virtual = format!(
                    "load \"{}\"",
                    self.dataset_expression(dataset, "FullyQualifiedName")
                );
                parked = parked.replace(&the_load, &the_virtual);
                debug!("📦 load \"{dataset}\" virtualized");
            }
        }
        restore(&rewriter.protected_text(&parked))
    }

    fn step_datasets(&self, step: &mut Map<String, Value>) {
        if let Some(Value::Array(datasets)) = step.get_mut("datasets") {
            for dataset in datasets.iter_mut() {
                let name = str_field(dataset, "name").to_string();
                if !name.is_empty() {
                    *dataset = json!({"name": self.dataset_name(&name)});
                }
            }
        }
    }

    fn widget(
        &self,
        node: WidgetNode<'_>,
        rewriter: &FieldRewriter,
        asset_name: &str,
        widget_name: &str,
    ) -> Option<String> {
        match node {
            WidgetNode::Component(parameters) => {
                rename_parameters(parameters, rewriter);
                let source = parameters.get_mut("source")?.as_object_mut()?;
                let name = source.get("name").and_then(Value::as_str)?.to_string();
                match self.index.component_reference(&name) {
                    Some(reference) => {
                        source.insert("name".into(), Value::String(reference));
                        source.insert("namespace".into(), Value::String(ORG_NAMESPACE.into()));
                        None
                    }
                    None => Some(format!(
                        "{asset_name}.{widget_name} embeds component '{name}' which is not in the package"
                    )),
                }
            }
            WidgetNode::Link(destination, parameters) => {
                rename_parameters(parameters, rewriter);
                self.link(destination, parameters, asset_name, widget_name)
            }
            WidgetNode::Chart(parameters) => {
                rename_parameters(parameters, rewriter);
                if let Some(Value::Array(lines)) = parameters.get_mut("referenceLines") {
                    for line in lines.iter_mut().filter_map(Value::as_object_mut) {
                        line.remove("compact");
                    }
                }
                None
            }
            WidgetNode::FilterPanel(parameters) => {
                rename_parameters(parameters, rewriter);
                if let Some(Value::Array(filters)) = parameters.get_mut("filters") {
                    for filter in filters.iter_mut() {
                        let Some(name) = filter
                            .pointer("/dataset/name")
                            .and_then(Value::as_str)
                            .map(str::to_owned)
                        else {
                            continue;
                        };
                        filter["dataset"]["name"] = Value::String(self.dataset_name(&name));
                    }
                }
                None
            }
            WidgetNode::Picture(parameters) => {
                parameters.remove("image");
                rename_parameters(parameters, rewriter);
                None
            }
            WidgetNode::Other(parameters) => {
                rename_parameters(parameters, rewriter);
                None
            }
        }
    }

    fn link(
        &self,
        destination: LinkDestination,
        parameters: &mut Map<String, Value>,
        asset_name: &str,
        widget_name: &str,
    ) -> Option<String> {
        match destination {
            LinkDestination::Lens => {
                parameters.remove("destinationLink");
                None
            }
            LinkDestination::Dashboard => {
                let link = parameters.get_mut("destinationLink")?.as_object_mut()?;
                let target = link.get("name").and_then(Value::as_str)?.to_string();
                match self.index.dashboard_reference(&target) {
                    Some(reference) => {
                        link.insert("name".into(), Value::String(reference));
                        None
                    }
                    None => {
                        // -- left symbolic: the installer will not find it, the link breaks
                        link.insert(
                            "name".into(),
                            Value::String(format!("${{App.Dashboards['{target}'].Name}}")),
                        );
                        Some(format!(
                            "{asset_name}.{widget_name} links to dashboard '{target}' which is not in the package"
                        ))
                    }
                }
            }
            LinkDestination::Component => {
                let link = parameters.get_mut("destinationLink")?.as_object_mut()?;
                let target = link.get("name").and_then(Value::as_str)?.to_string();
                match self.index.component_reference(&target) {
                    Some(reference) => {
                        link.insert("name".into(), Value::String(reference));
                        None
                    }
                    None => Some(format!(
                        "{asset_name}.{widget_name} links to component '{target}' which is not in the package"
                    )),
                }
            }
            LinkDestination::Other => None,
        }
    }

    fn filter(&self, node: FilterNode<'_>) {
        let FilterNode { dataset, filter } = node;
        if let (Some(rewriter), Some(fields)) = (self.single(&dataset), filter.get_mut("fields")) {
            rewriter.value(fields);
        }
        filter.insert("dataset".into(), json!({"name": self.dataset_name(&dataset)}));
    }

    /// 🔗 Only dataset-backed fields survive, each pointed at its virtual dataset.
    fn data_source_link(&self, link: &mut Map<String, Value>) {
        let Some(Value::Array(fields)) = link.get_mut("fields") else {
            return;
        };
        let the_survivors: Vec<Value> = fields
            .iter()
            .filter(|field| str_field(field, "dataSourceType") == "dataset")
            .map(|field| {
                let dataset = str_field(field, "dataSourceName");
                let field_name = str_field(field, "fieldName");
                let renamed = self
                    .plans
                    .cleaned(dataset, field_name)
                    .unwrap_or(field_name);
                json!({
                    "dataSourceName": self.dataset_name(dataset),
                    "dataSourceNamespace": ORG_NAMESPACE,
                    "dataSourceType": "dataset",
                    "fieldName": renamed,
                })
            })
            .collect();
        *fields = the_survivors;
    }

    fn metadata(&self, asset: &mut Value, asset_xmd: Option<&Value>, rewriter: &FieldRewriter) {
        let Some(map) = asset.as_object_mut() else {
            return;
        };
        for key in VOLATILE_ASSET_KEYS {
            map.remove(*key);
        }
        let folder = map
            .entry("folder")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(folder) = folder.as_object_mut() {
            for key in VOLATILE_FOLDER_KEYS {
                folder.remove(*key);
            }
            folder.insert("id".into(), Value::String(FOLDER_ID.into()));
        }
        if let Some(Value::String(name)) = map.get_mut("name") {
            name.push_str(self.suffix);
        }
        if let Some(asset_xmd) = asset_xmd {
            let mut the_xmd = asset_xmd.clone();
            xmd::strip_volatile_keys(&mut the_xmd);
            xmd::rename_fields(&mut the_xmd, rewriter);
            map.insert("xmd".into(), the_xmd);
        }
    }
}

fn rename_parameters(parameters: &mut Map<String, Value>, rewriter: &FieldRewriter) {
    for (key, value) in parameters.iter_mut() {
        if !NAME_PARAMETERS.contains(&key.as_str()) {
            rewriter.value(value);
        }
    }
    rename_field_keys(parameters, rewriter);
}

/// 🔑 Renames the keys of every [`FIELD_KEYED_MAPS`] entry, at any depth. Values are left alone.
fn rename_field_keys(map: &mut Map<String, Value>, rewriter: &FieldRewriter) {
    for (key, value) in map.iter_mut() {
        match value {
            Value::Object(inner) => {
                if FIELD_KEYED_MAPS.contains(&key.as_str()) {
                    rewriter.keys(inner);
                }
                rename_field_keys(inner, rewriter);
            }
            Value::Array(items) => {
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    rename_field_keys(item, rewriter);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FieldKind;
    use crate::transforms::names::{DatasetRenamePlan, FieldRename};

    fn the_plans() -> FieldRenameMap {
        let mut plans = FieldRenameMap::default();
        plans.insert(DatasetRenamePlan::from_renames(
            "OpportunityDS",
            "OpportunityDS_ABC",
            [
                FieldRename {
                    original: "Account.Name".into(),
                    cleaned: "AccountDOTName".into(),
                    kind: FieldKind::Dimension,
                },
                FieldRename {
                    original: "Close_Date".into(),
                    cleaned: "CloseDate".into(),
                    kind: FieldKind::Date,
                },
                FieldRename {
                    original: "Amount".into(),
                    cleaned: "Amount".into(),
                    kind: FieldKind::Measure,
                },
            ],
        ));
        plans
    }

    fn the_index() -> PackageIndex {
        PackageIndex {
            dashboards: BTreeMap::from([("D1".into(), "Dashboard One".into())]),
            components: BTreeMap::from([("Header".into(), "Header Label".into())]),
        }
    }

    fn a_dashboard() -> Value {
        json!({
            "id": "0FK000000000001",
            "name": "D1",
            "label": "Dashboard One",
            "type": "dashboard",
            "url": "/services/data/v58.0/wave/dashboards/0FK000000000001",
            "createdBy": {"id": "005"},
            "folder": {"id": "00l1", "label": "Sales", "name": "Sales", "url": "/x"},
            "datasets": [{"id": "0Fb1", "name": "OpportunityDS", "url": "/y"}],
            "state": {
                "steps": {
                    "lens_1": {
                        "type": "saql",
                        "datasets": [{"name": "OpportunityDS", "id": "0Fb1"}],
                        "query": "q = load \"OpportunityDS\"; q = filter q by 'Amount' > 0.5 && 'Close_Date_Year' in [\"2020\"..\"2024\"]; q = group q by 'Account.Name'; q = foreach q generate 'Account.Name' as 'Account.Name', sum('Amount') as 'sum_Amount';"
                    },
                    "soql_1": {
                        "type": "soql",
                        "query": "SELECT Account.Name, Close_Date FROM Opportunity"
                    },
                    "agg_1": {
                        "type": "aggregateflex",
                        "datasets": [{"name": "OpportunityDS"}],
                        "query": {
                            "measures": [["sum", "Amount"]],
                            "groups": ["Account.Name", "Close_Date_Month"],
                            "sources": [{"name": "OpportunityDS", "columns": [{"field": ["sum", "Amount"], "name": "sum_Amount"}]}]
                        }
                    }
                },
                "widgets": {
                    "chart_1": {
                        "type": "chart",
                        "parameters": {
                            "step": "lens_1",
                            "columnMap": {"dimensionAxis": ["Account.Name"], "plots": ["sum_Amount"]},
                            "title": {"label": "By [Account.Name]"},
                            "referenceLines": [{"compact": true, "value": 1}]
                        }
                    },
                    "text_1": {
                        "type": "text",
                        "parameters": {"content": {"displayTemplate": "{{cell(lens_1.result, 0, \"Account.Name\").asString()}}"}}
                    },
                    "link_1": {
                        "type": "link",
                        "parameters": {"destinationType": "dashboard", "destinationLink": {"name": "D2"}}
                    },
                    "link_2": {
                        "type": "link",
                        "parameters": {"destinationType": "lens", "destinationLink": {"name": "somelens"}}
                    },
                    "image_1": {"type": "image", "parameters": {"image": {"name": "logo.png"}, "fit": "fill"}},
                    "comp_1": {"type": "component", "parameters": {"source": {"name": "Header"}}},
                    "filter_1": {
                        "type": "filterpanel",
                        "parameters": {"filters": [{"dataset": {"name": "OpportunityDS"}, "fields": ["Account.Name"]}]}
                    }
                },
                "filters": [{"dataset": {"name": "OpportunityDS", "id": "0Fb1"}, "fields": ["Account.Name"]}],
                "dataSourceLinks": [{
                    "name": "Link_1",
                    "fields": [
                        {"dataSourceName": "OpportunityDS", "dataSourceType": "dataset", "fieldName": "Account.Name"},
                        {"dataSourceName": "soql_1", "dataSourceType": "soql", "fieldName": "Name"}
                    ]
                }]
            }
        })
    }

    fn rewritten() -> (Value, Vec<String>) {
        let plans = the_plans();
        let index = the_index();
        let rewriter = AssetRewriter::new("_ABC", &plans, &index);
        let mut asset = a_dashboard();
        let the_xmd = json!({
            "type": "asset",
            "createdBy": {"id": "005"},
            "dimensions": [{"field": "lens_1.Account.Name", "showInExplorer": true}]
        });
        let warnings = rewriter.rewrite(&mut asset, Some(&the_xmd));
        (asset, warnings)
    }

    #[test]
    fn the_one_where_the_saql_load_goes_virtual() {
        let (asset, _) = rewritten();
        let the_query = asset["state"]["steps"]["lens_1"]["query"]
            .as_str()
            .expect("query is a string");
        assert!(
            the_query.starts_with(
                "q = load \"${App.Datasets.OpportunityDS_ABC.FullyQualifiedName}\";"
            ),
            "{the_query}"
        );
        assert!(the_query.contains("'Amount' > 0.5"));
        assert!(the_query.contains("'CloseDate_Year' in [\"2020\"..\"2024\"]"));
        assert!(the_query.contains("'AccountDOTName' as 'AccountDOTName'"));
        assert!(the_query.contains("sum('Amount') as 'sum_Amount'"));
        assert_eq!(
            asset["state"]["steps"]["lens_1"]["datasets"],
            json!([{"name": "${App.Datasets.OpportunityDS_ABC.Name}"}])
        );
    }

    #[test]
    fn the_one_where_soql_is_left_exactly_as_it_was() {
        let (asset, _) = rewritten();
        assert_eq!(
            asset["state"]["steps"]["soql_1"],
            a_dashboard()["state"]["steps"]["soql_1"]
        );
    }

    fn a_dashboard_keyed_by_fields() -> Value {
        json!({
            "name": "D1",
            "label": "Dashboard One",
            "datasets": [{"name": "OpportunityDS"}],
            "state": {
                "steps": {
                    "lens_1": {
                        "type": "saql",
                        "datasets": [{"name": "OpportunityDS"}],
                        "query": "q = load \"OpportunityDS\"; q = group q by 'Account.Name';",
                        "groups": ["Account.Name"],
                        "strings": ["Account.Name"],
                        "numbers": ["sum_Amount"],
                        "start": {"Account.Name": ["Amount"]}
                    }
                },
                "widgets": {
                    "table_1": {
                        "type": "table",
                        "parameters": {
                            "step": "lens_1",
                            "columns": ["Account.Name"],
                            "columnProperties": {"Account.Name": {"width": 100}, "other": {"width": 5}}
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn the_one_where_the_saql_step_keys_around_the_query_get_renamed_too() {
        let plans = the_plans();
        let index = the_index();
        let mut asset = a_dashboard_keyed_by_fields();
        AssetRewriter::new("_ABC", &plans, &index).rewrite(&mut asset, None);

        let step = &asset["state"]["steps"]["lens_1"];
        assert_eq!(step["groups"], json!(["AccountDOTName"]));
        assert_eq!(step["strings"], json!(["AccountDOTName"]));
        assert_eq!(step["numbers"], json!(["sum_Amount"]));
        // -- a selected value that happens to spell a field stays a value
        assert_eq!(step["start"], json!({"AccountDOTName": ["Amount"]}));
    }

    #[test]
    fn the_one_where_column_properties_are_keyed_by_the_new_names() {
        let plans = the_plans();
        let index = the_index();
        let mut asset = a_dashboard_keyed_by_fields();
        AssetRewriter::new("_ABC", &plans, &index).rewrite(&mut asset, None);

        let parameters = &asset["state"]["widgets"]["table_1"]["parameters"];
        assert_eq!(parameters["columns"], json!(["AccountDOTName"]));
        assert_eq!(
            parameters["columnProperties"],
            json!({"AccountDOTName": {"width": 100}, "other": {"width": 5}})
        );
        let keys: Vec<&String> = parameters["columnProperties"]
            .as_object()
            .map(|map| map.keys().collect())
            .unwrap_or_default();
        assert_eq!(keys, ["AccountDOTName", "other"]);
    }

    #[test]
    fn the_one_where_aggregate_sources_and_groups_follow_along() {
        let (asset, _) = rewritten();
        let the_query = &asset["state"]["steps"]["agg_1"]["query"];
        assert_eq!(the_query["groups"], json!(["AccountDOTName", "CloseDate_Month"]));
        assert_eq!(
            the_query["sources"][0]["name"],
            "${App.Datasets.OpportunityDS_ABC.Name}"
        );
    }

    #[test]
    fn the_one_where_widgets_get_their_cleanup() {
        let (asset, _) = rewritten();
        let widgets = &asset["state"]["widgets"];
        assert_eq!(
            widgets["chart_1"]["parameters"]["columnMap"]["dimensionAxis"],
            json!(["AccountDOTName"])
        );
        assert_eq!(widgets["chart_1"]["parameters"]["title"]["label"], "By [AccountDOTName]");
        assert_eq!(
            widgets["chart_1"]["parameters"]["referenceLines"],
            json!([{"value": 1}])
        );
        assert_eq!(
            widgets["text_1"]["parameters"]["content"]["displayTemplate"],
            "{{cell(lens_1.result, 0, \"AccountDOTName\").asString()}}"
        );
        assert!(widgets["link_2"]["parameters"].get("destinationLink").is_none());
        assert!(widgets["image_1"]["parameters"].get("image").is_none());
        assert_eq!(
            widgets["comp_1"]["parameters"]["source"],
            json!({"name": "${App.Components['Header Label'].Name}", "namespace": "${Org.Namespace}"})
        );
        assert_eq!(
            widgets["filter_1"]["parameters"]["filters"][0],
            json!({"dataset": {"name": "${App.Datasets.OpportunityDS_ABC.Name}"}, "fields": ["AccountDOTName"]})
        );
    }

    #[test]
    fn the_one_where_a_link_outside_the_package_stays_symbolic_and_warns() {
        let (asset, warnings) = rewritten();
        assert_eq!(
            asset["state"]["widgets"]["link_1"]["parameters"]["destinationLink"]["name"],
            "${App.Dashboards['D2'].Name}"
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'D2'"));
    }

    #[test]
    fn the_one_where_filters_and_data_source_links_point_at_virtual_datasets() {
        let (asset, _) = rewritten();
        assert_eq!(
            asset["state"]["filters"],
            json!([{"dataset": {"name": "${App.Datasets.OpportunityDS_ABC.Name}"}, "fields": ["AccountDOTName"]}])
        );
        assert_eq!(
            asset["state"]["dataSourceLinks"][0]["fields"],
            json!([{
                "dataSourceName": "${App.Datasets.OpportunityDS_ABC.Name}",
                "dataSourceNamespace": "${Org.Namespace}",
                "dataSourceType": "dataset",
                "fieldName": "AccountDOTName"
            }])
        );
    }

    #[test]
    fn the_one_where_the_metadata_forgets_where_it_came_from() {
        let (asset, _) = rewritten();
        assert_eq!(asset["name"], "D1_ABC");
        assert_eq!(asset["folder"], json!({"id": "${App.Folder.Id}"}));
        for key in ["id", "url", "type", "datasets", "createdBy"] {
            assert!(asset.get(key).is_none(), "{key} should be gone");
        }
        assert_eq!(
            asset["xmd"],
            json!({"dimensions": [{"field": "lens_1.AccountDOTName", "showInExplorer": true}]})
        );
    }
}
