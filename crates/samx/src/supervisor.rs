//! 🎬 The Supervisor: one migration run, start to finish.
//!
//! ```text
//!   ask label ─▶ log in ─▶ pick dashboards ─▶ resolve ─▶ closure? ─▶ merge
//!        ─▶ rename plans ─▶ export ─▶ rewrite assets ─▶ action fields
//!        ─▶ package ─▶ install ─▶ RunSummary
//! ```
//!
//! Stages run in that order and only ever read what an earlier stage
//! produced. Every question goes through the [`UserDecisionPort`]; every
//! subprocess through the [`CommandRunner`]. Swap both and a source backend
//! and the whole run happens inside a test. 🦆

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::Table;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::{AnalyticsSource, CommandRunner, Selection, SfdxCli, SourceBackend, WaveRestSource};
use crate::common::{DatasetRef, FieldKind, MergedBundle, str_field};
use crate::context::MigrationContext;
use crate::decisions::{DashboardSet, DatasetDimensions, MigrationScope, UserDecisionPort};
use crate::errors::SamxError;
use crate::export::{ExportMode, Exporter};
use crate::fetcher;
use crate::install::{self, InstallOutcome};
use crate::packager::{self, ActionFramework, DatasetFiles, Package};
use crate::progress::{format_duration, format_number, summary_table};
use crate::resolver;
use crate::retry::RetryPolicy;
use crate::schema;
use crate::transforms::{AssetRewriter, PackageIndex};

/// 🧾 What one run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub template: String,
    pub dashboards: usize,
    pub components: usize,
    pub datasets: usize,
    pub rows: u64,
    pub action_fields: usize,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
    pub install: InstallOutcome,
}

impl RunSummary {
    pub fn table(&self) -> Table {
        let rows = [
            ("template", self.template.clone()),
            ("dashboards", self.dashboards.to_string()),
            ("components", self.components.to_string()),
            ("datasets", self.datasets.to_string()),
            ("rows exported", format_number(self.rows)),
            ("action fields", self.action_fields.to_string()),
            ("installed as", self.install.app_id.clone().unwrap_or_else(|| "manual".into())),
            ("runtime", format_duration(self.elapsed)),
        ];
        summary_table(&rows, &self.warnings)
    }
}

pub struct Supervisor {
    app_config: AppConfig,
    sfdx: SfdxCli,
    retry: RetryPolicy,
    /// 🔌 already connected; when absent the run connects over REST
    source: Option<SourceBackend>,
}

impl Supervisor {
    pub fn new(app_config: AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let retry = RetryPolicy::from(&app_config.retry);
        let sfdx = SfdxCli::new(app_config.sfdx_program.clone(), runner, retry.clone());
        Self {
            app_config,
            sfdx,
            retry,
            source: None,
        }
    }

    pub fn with_source(mut self, source: SourceBackend) -> Self {
        self.source = Some(source);
        self
    }

    async fn source_username(&self) -> Result<String> {
        match &self.app_config.source.target_org {
            Some(org) => Ok(org.clone()),
            None => {
                info!("🌍 source org first");
                Ok(self.sfdx.login().await?.username)
            }
        }
    }

    async fn connect(&self, username: &str) -> Result<SourceBackend> {
        let config = &self.app_config.source;
        let (instance_url, access_token) = match (&config.instance_url, &config.access_token) {
            (Some(url), Some(token)) => (url.clone(), token.clone()),
            _ => {
                let display = self.sfdx.org_display(username).await?;
                (display.instance_url, display.access_token)
            }
        };
        let source = WaveRestSource::new(&instance_url, &access_token, &config.api_version, self.retry.clone())?;
        Ok(SourceBackend::WaveRest(source))
    }

    /// 🎯 Dashboard names to start from: configured, or picked by the operator.
    async fn requested_dashboards(
        &self,
        username: &str,
        decisions: &mut dyn UserDecisionPort,
    ) -> Result<Vec<String>> {
        let selection = self.app_config.source.selection.clone().unwrap_or_default();
        if !selection.dashboards.is_empty() {
            return Ok(selection.dashboards);
        }
        let the_names = if !selection.apps.is_empty() {
            self.dashboards_of_apps(username, &selection).await?
        } else {
            match decisions.migration_scope()? {
                MigrationScope::Dashboards => {
                    let listed = self.sfdx.dashboard_list(username).await?;
                    decisions
                        .select_dashboards(&listed)?
                        .into_iter()
                        .filter_map(|i| listed.get(i).map(|d| d.name.clone()))
                        .collect()
                }
                MigrationScope::Apps => {
                    let apps = self.sfdx.app_list(username).await?;
                    let picked: Vec<String> = decisions
                        .select_apps(&apps)?
                        .into_iter()
                        .filter_map(|i| apps.get(i).map(|app| app.name.clone()))
                        .collect();
                    let selection = Selection {
                        apps: picked,
                        ..Default::default()
                    };
                    self.dashboards_of_apps(username, &selection).await?
                }
            }
        };
        if the_names.is_empty() {
            return Err(SamxError::Cancelled("no dashboards selected".into()).into());
        }
        Ok(the_names)
    }

    /// 📁 Every dashboard whose folder is one of the named apps.
    async fn dashboards_of_apps(&self, username: &str, selection: &Selection) -> Result<Vec<String>> {
        let apps = self.sfdx.app_list(username).await?;
        let app_ids: Vec<&str> = apps
            .iter()
            .filter(|app| selection.apps.contains(&app.name))
            .map(|app| app.id.as_str())
            .collect();
        let listed = self.sfdx.dashboard_list(username).await?;
        Ok(listed
            .into_iter()
            .filter(|d| d.folder_id.as_deref().is_some_and(|id| app_ids.contains(&id)))
            .map(|d| d.name)
            .collect())
    }

    pub async fn run(&self, decisions: &mut dyn UserDecisionPort) -> Result<RunSummary> {
        let config = &self.app_config;
        let label = match &config.template.label {
            Some(label) => label.clone(),
            None => decisions.template_label()?,
        };
        let auto_install = match config.template.auto_install {
            Some(auto_install) => auto_install,
            None => decisions.auto_install()?,
        };
        let mut ctx = MigrationContext::new(&config.template, label, auto_install);
        info!("🎬 building template {} into {}", ctx.api_name, ctx.layout.project_root.display());
        ctx.layout.create()?;

        let username = self.source_username().await?;
        let connected;
        let source: &SourceBackend = match &self.source {
            Some(source) => source,
            None => {
                connected = self.connect(&username).await?;
                &connected
            }
        };

        // -- resolve
        let requested = self.requested_dashboards(&username, decisions).await?;
        let mut resolution = resolver::resolve(source, &requested).await?;
        for gap in &resolution.unresolved {
            ctx.warn(format!("linked dashboard '{gap}' could not be fetched; its links will not resolve"));
        }
        if !resolution.extras().is_empty() {
            let answer = decisions.choose_dashboard_set(&resolution.requested, &resolution.closure)?;
            if answer == DashboardSet::Requested {
                resolution = resolution.restrict_to_requested();
            }
        }

        // -- fetch
        let mut merged = fetcher::merge(&resolution);
        let inventories = fetcher::build_plans(source, &mut merged, &mut ctx, &config.rename).await?;
        let exporter = match config.export.mode {
            ExportMode::Query => Exporter::Query(source),
            ExportMode::Cli => Exporter::Cli {
                sfdx: &self.sfdx,
                username: &username,
                period_policy: config.rename.period_policy,
            },
        };
        let exports = fetcher::export_datasets(exporter, &merged, &ctx, &config.export, &self.retry).await?;

        // -- transform
        let mut package = Package::default();
        for exported in &exports {
            let dataset: &DatasetRef = merged
                .datasets
                .get(&exported.dataset)
                .with_context(|| format!("💀 Exported '{}' but it is not in the bundle", exported.dataset))?;
            let plan = ctx
                .plan_for(&dataset.name)
                .with_context(|| format!("💀 Dataset '{}' has no rename plan", dataset.name))?;
            let fields = inventories
                .get(&dataset.name)
                .with_context(|| format!("💀 Dataset '{}' has no field inventory", dataset.name))?;
            package.datasets.push(DatasetFiles {
                label: dataset.label_or_name().to_string(),
                target_dataset: plan.target_dataset.clone(),
                files: exported.files.clone(),
                schema: schema::dataset_schema(plan, fields, exported),
                user_xmd: schema::user_xmd(dataset, merged.main_xmd(dataset), plan, &exported.header),
            });
        }

        let index = PackageIndex {
            dashboards: merged
                .dashboards
                .iter()
                .map(|(name, asset)| (name.clone(), str_field(asset, "label").to_string()))
                .collect(),
            components: merged
                .components
                .iter()
                .map(|(name, asset)| (name.clone(), str_field(asset, "label").to_string()))
                .collect(),
        };
        let mut rewrite_warnings = Vec::new();
        {
            let rewriter = AssetRewriter::new(&ctx.suffix, &ctx.plans, &index);
            for (assets, into) in [
                (&merged.components, &mut package.components),
                (&merged.dashboards, &mut package.dashboards),
            ] {
                for asset in assets.values() {
                    let asset_xmd = merged.asset_xmd(asset).cloned();
                    let mut the_asset = asset.clone();
                    rewrite_warnings.extend(rewriter.rewrite(&mut the_asset, asset_xmd.as_ref()));
                    into.push(the_asset);
                }
            }
        }
        ctx.absorb_warnings(rewrite_warnings);

        // -- package
        let dimensions: Vec<DatasetDimensions> = package
            .datasets
            .iter()
            .filter_map(|ds| {
                let plan = ctx.plans.plans().find(|plan| plan.target_dataset == ds.target_dataset)?;
                Some(DatasetDimensions {
                    dataset: plan.target_dataset.clone(),
                    dimensions: plan
                        .renames()
                        .iter()
                        .filter(|rename| rename.kind == FieldKind::Dimension)
                        .map(|rename| rename.cleaned.clone())
                        .collect(),
                })
            })
            .collect();
        let af = ActionFramework::collect(decisions, &dimensions)?;
        packager::write(&ctx, &package, &af)?;

        // -- install
        let outcome = install::install(&self.sfdx, &config.destination, &ctx, &af, decisions).await?;

        let summary = RunSummary {
            template: ctx.api_name.clone(),
            dashboards: package.dashboards.len(),
            components: package.components.len(),
            datasets: package.datasets.len(),
            rows: exports.iter().map(|e| e.rows).sum(),
            action_fields: af.fields().len(),
            warnings: ctx.warnings().to_vec(),
            elapsed: ctx.elapsed(),
            install: outcome,
        };
        info!(
            "✅ {} done in {}: {} dashboard(s), {} component(s), {} dataset(s)",
            summary.template,
            format_duration(summary.elapsed),
            summary.dashboards,
            summary.components,
            summary.datasets
        );
        Ok(summary)
    }
}

/// 📄 One dataset, no dashboards: CSV, schema and user xmd into `out`.
pub async fn export_single_dataset(
    app_config: &AppConfig,
    runner: Arc<dyn CommandRunner>,
    source: Option<SourceBackend>,
    dataset_name: &str,
) -> Result<packager::ExternalFileEntry> {
    let supervisor = Supervisor::new(app_config.clone(), runner);
    let supervisor = match source {
        Some(source) => supervisor.with_source(source),
        None => supervisor,
    };
    let username = supervisor.source_username().await?;
    let connected;
    let source: &SourceBackend = match &supervisor.source {
        Some(source) => source,
        None => {
            connected = supervisor.connect(&username).await?;
            &connected
        }
    };

    let dataset = source
        .list_datasets()
        .await?
        .into_iter()
        .find(|ds| ds.name == dataset_name)
        .ok_or_else(|| SamxError::UnknownDataset(dataset_name.to_string()))?;
    let label = app_config
        .template
        .label
        .clone()
        .unwrap_or_else(|| dataset_name.to_string());
    let mut ctx = MigrationContext::new(&app_config.template, label, false);
    ctx.layout.create()?;

    let mut merged = MergedBundle::default();
    merged.datasets.insert(dataset.name.clone(), dataset.clone());
    let inventories = fetcher::build_plans(source, &mut merged, &mut ctx, &app_config.rename).await?;
    let exporter = match app_config.export.mode {
        ExportMode::Query => Exporter::Query(source),
        ExportMode::Cli => Exporter::Cli {
            sfdx: &supervisor.sfdx,
            username: &username,
            period_policy: app_config.rename.period_policy,
        },
    };
    let exports = fetcher::export_datasets(exporter, &merged, &ctx, &app_config.export, &supervisor.retry).await?;
    let exported = exports
        .first()
        .with_context(|| format!("💀 Nothing came back for dataset '{dataset_name}'"))?;
    let plan = ctx
        .plan_for(&dataset.name)
        .with_context(|| format!("💀 Dataset '{}' has no rename plan", dataset.name))?;
    let fields = inventories
        .get(&dataset.name)
        .with_context(|| format!("💀 Dataset '{}' has no field inventory", dataset.name))?;

    let target = &plan.target_dataset;
    let schema_path = ctx.layout.external_file(target, "json");
    packager::write_json(&schema_path, &schema::dataset_schema(plan, fields, exported))?;
    let xmd_path = ctx.layout.user_xmd_file(target);
    let the_xmd = schema::user_xmd(&dataset, merged.main_xmd(&dataset), plan, &exported.header);
    packager::write_json(&xmd_path, &the_xmd)?;

    let file_name = |path: &std::path::Path| {
        path.file_name()
            .map(|name| format!("external_files/{}", name.to_string_lossy()))
            .unwrap_or_default()
    };
    info!("📄 {dataset_name} → {}", ctx.layout.external_files.display());
    Ok(packager::ExternalFileEntry {
        label: dataset.label_or_name().to_string(),
        name: target.clone(),
        condition: packager::manifest::CREATE_ALL_EXTERNAL_FILES.to_string(),
        user_xmd: file_name(&xmd_path),
        file: exported.files.first().map(|f| file_name(f)).unwrap_or_default(),
        schema: file_name(&schema_path),
        kind: "CSV".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{CommandOutput, InMemorySource, Record, ScriptedRunner};
    use crate::common::DashboardBundle;
    use crate::context::TemplateConfig;
    use crate::decisions::ScriptedDecisions;
    use crate::retry::{Backoff, RetryConfig};
    use serde_json::{Value, json};

    fn a_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.template = TemplateConfig {
            label: Some("Sales Pack".into()),
            suffix: Some("_ABC".into()),
            output_dir: dir.to_path_buf(),
            auto_install: Some(false),
            ..Default::default()
        };
        config.source.target_org = Some("orga@example.com".into());
        config.destination.target_org = Some("orgb@example.com".into());
        config.retry = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            backoff: Backoff::Fixed,
        };
        config
    }

    fn a_dashboard(name: &str, links_to: Option<&str>) -> Value {
        let mut widgets = serde_json::Map::new();
        widgets.insert(
            "chart_1".into(),
            json!({"type": "chart", "parameters": {"step": "lens_1", "columnMap": {"dimensionAxis": ["Region.Name"]}}}),
        );
        if let Some(target) = links_to {
            widgets.insert(
                "link_1".into(),
                json!({"type": "link", "parameters": {"destinationType": "dashboard", "destinationLink": {"name": target}}}),
            );
        }
        json!({
            "id": format!("0FK{name}"),
            "name": name,
            "label": format!("{name} label"),
            "folder": {"id": "00l1"},
            "datasets": [{"id": "0Fb1", "name": "Opportunity"}],
            "state": {
                "steps": {
                    "lens_1": {
                        "type": "saql",
                        "datasets": [{"name": "Opportunity"}],
                        "query": "q = load \"Opportunity\"; q = group q by 'Region.Name'; q = foreach q generate 'Region.Name' as 'Region.Name', sum('Amount') as 'sum_Amount';"
                    }
                },
                "widgets": widgets
            }
        })
    }

    fn an_org() -> InMemorySource {
        let opportunity = DatasetRef {
            id: "0Fb1".into(),
            name: "Opportunity".into(),
            label: Some("Opportunities".into()),
            version: Some("0Fc1".into()),
            ..Default::default()
        };
        let bundle = |name: &str, links_to: Option<&str>| {
            let mut bundle = DashboardBundle {
                asset: a_dashboard(name, links_to),
                datasets: vec![opportunity.clone()],
                ..Default::default()
            };
            bundle.xmds.insert(
                "0Fb1".into(),
                json!({
                    "type": "main",
                    "dates": [{"fields": {"fullField": "CloseDate"}, "format": "yyyy-MM-dd"}],
                    "dimensions": [{"field": "Region.Name"}, {"field": "AccountId"}],
                    "measures": [{"field": "Amount", "format": {"decimalDigits": 2}}]
                }),
            );
            bundle
        };
        let rows: Vec<Record> = (0..3)
            .map(|i| {
                let mut row = Record::new();
                row.insert("CloseDate".into(), json!(format!("2024-01-0{}", i + 1)));
                row.insert("Region.Name".into(), json!(["EMEA", "APAC", "AMER"][i]));
                row.insert("AccountId".into(), json!(format!("001{i}")));
                row.insert("Amount".into(), json!(10.5 * i as f64));
                row
            })
            .collect();
        InMemorySource::new()
            .with_bundle(bundle("D1", Some("D2")))
            .with_bundle(bundle("D2", None))
            .with_dataset(opportunity, json!({"type": "main"}), rows)
    }

    #[tokio::test]
    async fn the_one_where_d1_travels_alone_and_its_link_dangles() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = a_config(dir.path());
        config.source.selection = Some(Selection {
            dashboards: vec!["D1".into()],
            ..Default::default()
        });
        let runner = Arc::new(ScriptedRunner::new());
        let supervisor = Supervisor::new(config, runner.clone()).with_source(SourceBackend::InMemory(an_org()));
        let mut decisions = ScriptedDecisions {
            dashboard_set: DashboardSet::Requested,
            install: false,
            ..Default::default()
        };

        let summary = supervisor.run(&mut decisions).await?;
        assert_eq!(decisions.closure_questions, vec![(vec!["D1".to_string()], vec!["D1".to_string(), "D2".to_string()])]);
        assert_eq!(summary.dashboards, 1);
        assert_eq!(summary.datasets, 1);
        assert_eq!(summary.rows, 3);
        assert!(summary.warnings.iter().any(|w| w.contains("'D2'")), "{:?}", summary.warnings);

        let template_dir = dir.path().join("Sales_Pack_ABC/force-app/main/default/waveTemplates/Sales_Pack_ABC");
        let info = packager::read_json(&template_dir.join("template-info.json"))?;
        assert_eq!(info["dashboards"].as_array().map(Vec::len), Some(1));
        assert_eq!(info["dashboards"][0]["name"], "D1_ABC");
        let d1 = packager::read_json(&template_dir.join("dashboards/D1_ABC.json"))?;
        assert_eq!(
            d1["state"]["widgets"]["link_1"]["parameters"]["destinationLink"]["name"],
            "${App.Dashboards['D2'].Name}"
        );
        assert!(!template_dir.join("dashboards/D2_ABC.json").exists());
        assert!(runner.calls_to("force:org:open").await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_whole_closure_ships_with_action_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = a_config(dir.path());
        config.template.auto_install = Some(true);
        config
            .destination
            .variables
            .insert("zAction_Framework_ID_1".into(), "AccountId".into());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "analytics:dashboard:list",
                    CommandOutput::ok(
                        r#"{"status":0,"result":[{"dashboardid":"0FKD1","name":"D1","label":"D1 label","folderid":"00l1"}]}"#,
                    ),
                )
                .on(
                    "analytics:autoinstall:app:create",
                    CommandOutput::ok(r#"{"status":0,"result":{"id":"0UZ000000000001AAA"}}"#),
                ),
        );
        let supervisor = Supervisor::new(config, runner.clone()).with_source(SourceBackend::InMemory(an_org()));
        let mut decisions = ScriptedDecisions {
            dashboards: vec!["D1".into()],
            action_fields: [("Opportunity_ABC".to_string(), "AccountId".to_string())].into(),
            ..Default::default()
        };

        let summary = supervisor.run(&mut decisions).await?;
        assert_eq!(summary.dashboards, 2);
        assert_eq!(summary.action_fields, 1);
        assert_eq!(summary.install.app_id.as_deref(), Some("0UZ000000000001AAA"));

        let template_dir = dir.path().join("Sales_Pack_ABC/force-app/main/default/waveTemplates/Sales_Pack_ABC");
        let d1 = packager::read_json(&template_dir.join("dashboards/D1_ABC.json"))?;
        assert_eq!(
            d1["state"]["widgets"]["link_1"]["parameters"]["destinationLink"]["name"],
            "${App.Dashboards['D2 label'].Name}"
        );
        let query = d1["state"]["steps"]["lens_1"]["query"].as_str().unwrap_or_default();
        assert!(query.contains("load \"${App.Datasets.Opportunity_ABC.FullyQualifiedName}\""), "{query}");
        assert!(query.contains("'RegionDOTName'"), "{query}");

        let schema = packager::read_json(&template_dir.join("external_files/Opportunity_ABC.json"))?;
        let close_date = schema["objects"][0]["fields"]
            .as_array()
            .and_then(|fields| fields.iter().find(|f| f["name"] == "CloseDate"))
            .cloned()
            .unwrap_or_default();
        assert_eq!(close_date["format"], "yyyy-MM-dd");
        let user_xmd = packager::read_json(&template_dir.join("external_files/Opportunity_ABC_XMD.json"))?;
        assert!(user_xmd["dimensions"]
            .as_array()
            .is_some_and(|dims| dims.iter().any(|d| d["recordIdField"] == "zAction_Framework_ID_1")));
        let recipe = std::fs::read_to_string(template_dir.join("recipes/Sales_Pack_ABC_af.json"))?;
        assert!(recipe.contains("AccountId") && !recipe.contains("${Variables.zAction_Framework_ID_1}"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_picks_anything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = Arc::new(ScriptedRunner::new().on(
            "analytics:dashboard:list",
            CommandOutput::ok(r#"{"status":0,"result":[]}"#),
        ));
        let supervisor = Supervisor::new(a_config(dir.path()), runner).with_source(SourceBackend::InMemory(an_org()));
        let err = supervisor
            .run(&mut ScriptedDecisions::default())
            .await
            .expect_err("nothing to migrate");
        assert!(matches!(err.downcast_ref::<SamxError>(), Some(SamxError::Cancelled(_))));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_one_dataset_goes_out_on_its_own() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = a_config(dir.path());
        let entry = export_single_dataset(
            &config,
            Arc::new(ScriptedRunner::new()),
            Some(SourceBackend::InMemory(an_org())),
            "Opportunity",
        )
        .await?;
        assert_eq!(entry.name, "Opportunity_ABC");
        assert_eq!(entry.file, "external_files/Opportunity_ABC.csv");
        let layout = crate::packager::TemplateLayout::new(dir.path(), "Sales_Pack_ABC");
        assert!(layout.external_file("Opportunity_ABC", "csv").exists());
        assert!(layout.user_xmd_file("Opportunity_ABC").exists());
        Ok(())
    }
}
