//! 🧺 Fetcher: resolved bundles in, one merged bundle and a pile of CSVs out.
//!
//! 1. merge the bundles the resolver already fetched (no second round trip)
//! 2. build a rename plan per dataset from its main xmd; when the bundle did
//!    not ship one, ask the dataset version endpoint for `xmdMain`
//! 3. export every dataset, `parallelism` at a time
//!
//! Plans land in the [`MigrationContext`]; field inventories are returned so
//! the schema writer knows kinds, decimals and date formats.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value;
use tracing::{debug, info};

use crate::backends::AnalyticsSource;
use crate::common::{DatasetFields, DatasetRef, MergedBundle};
use crate::context::MigrationContext;
use crate::export::{ExportConfig, ExportJob, ExportedDataset, Exporter};
use crate::resolver::Resolution;
use crate::retry::RetryPolicy;
use crate::transforms::{DatasetRenamePlan, RenameConfig};

pub fn merge(resolution: &Resolution) -> MergedBundle {
    let merged = MergedBundle::merge(resolution.ordered_bundles());
    info!(
        "🧺 merged {} dashboard(s), {} component(s), {} dataset(s)",
        merged.dashboards.len(),
        merged.components.len(),
        merged.datasets.len()
    );
    merged
}

/// 🧬 The main xmd of `dataset`: from the bundle if it came along, else from its version.
async fn main_xmd<S>(source: &S, merged: &MergedBundle, dataset: &DatasetRef) -> Result<Value>
where
    S: AnalyticsSource + ?Sized,
{
    if let Some(xmd) = merged.main_xmd(dataset) {
        return Ok(xmd.clone());
    }
    let version = match &dataset.version {
        Some(version) => version.clone(),
        None => source.dataset_current_version(&dataset.id).await?,
    };
    debug!("🧬 {} has no xmd in the bundle, asking version {version}", dataset.name);
    let mut payload = source
        .dataset_version(&dataset.id, &version)
        .await
        .with_context(|| format!("💀 Could not read the xmd of dataset '{}'", dataset.name))?;
    Ok(payload
        .get_mut("xmdMain")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// 🗺️ One rename plan per dataset, straight into `ctx.plans`.
pub async fn build_plans<S>(
    source: &S,
    merged: &mut MergedBundle,
    ctx: &mut MigrationContext,
    rename: &RenameConfig,
) -> Result<BTreeMap<String, DatasetFields>>
where
    S: AnalyticsSource + ?Sized,
{
    let mut inventories = BTreeMap::new();
    let datasets: Vec<DatasetRef> = merged.datasets.values().cloned().collect();
    for dataset in &datasets {
        let xmd = main_xmd(source, merged, dataset).await?;
        let fields = DatasetFields::from_main_xmd(&dataset.name, &xmd);
        let plan = DatasetRenamePlan::build(&fields, ctx.dataset_target_name(&dataset.name), rename);
        info!(
            "🗺️ {} → {} ({} fields)",
            dataset.name,
            plan.target_dataset,
            plan.renames().len()
        );
        ctx.plans.insert(plan);
        // -- keep the fetched xmd so the schema writer sees the same one
        if !dataset.id.is_empty() {
            merged.xmds.entry(dataset.id.clone()).or_insert(xmd);
        }
        inventories.insert(dataset.name.clone(), fields);
    }
    Ok(inventories)
}

/// 🚰 Every dataset to `external_files/<target>.csv`, `config.parallelism` at a time.
pub async fn export_datasets(
    exporter: Exporter<'_>,
    merged: &MergedBundle,
    ctx: &MigrationContext,
    config: &ExportConfig,
    retry: &RetryPolicy,
) -> Result<Vec<ExportedDataset>> {
    let mut jobs: Vec<(&DatasetRef, &DatasetRenamePlan, PathBuf)> = Vec::new();
    for dataset in merged.datasets.values() {
        let plan = ctx
            .plan_for(&dataset.name)
            .with_context(|| format!("💀 Dataset '{}' has no rename plan", dataset.name))?;
        let csv_path = ctx.layout.external_file(&plan.target_dataset, "csv");
        jobs.push((dataset, plan, csv_path));
    }

    let mut the_exports: Vec<ExportedDataset> = stream::iter(jobs.iter())
        .map(|(dataset, plan, csv_path)| {
            let job = ExportJob {
                dataset: *dataset,
                plan: *plan,
                csv_path: csv_path.as_path(),
            };
            async move {
                exporter
                    .export(job, config, retry)
                    .await
                    .with_context(|| format!("💀 Export of dataset '{}' failed", job.dataset.name))
            }
        })
        .buffer_unordered(config.parallelism.max(1))
        .try_collect()
        .await?;
    the_exports.sort_by(|a, b| a.dataset.cmp(&b.dataset));
    Ok(the_exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemorySource, Record};
    use crate::common::DashboardBundle;
    use crate::context::TemplateConfig;
    use crate::resolver;
    use serde_json::json;

    fn a_context(dir: &std::path::Path) -> MigrationContext {
        let config = TemplateConfig {
            suffix: Some("_ABC".into()),
            output_dir: dir.to_path_buf(),
            ..Default::default()
        };
        MigrationContext::new(&config, "Sales".into(), false)
    }

    fn a_source() -> InMemorySource {
        let opportunity = DatasetRef {
            id: "0Fb1".into(),
            name: "Opportunity".into(),
            version: Some("0Fc1".into()),
            ..Default::default()
        };
        let account = DatasetRef {
            id: "0Fb2".into(),
            name: "Account".into(),
            version: Some("0Fc2".into()),
            ..Default::default()
        };
        let mut bundle = DashboardBundle {
            asset: json!({"id": "0FK1", "name": "Sales", "label": "Sales", "state": {}}),
            datasets: vec![opportunity.clone(), account.clone()],
            ..Default::default()
        };
        bundle.xmds.insert(
            "0Fb1".into(),
            json!({"type": "main", "dimensions": [{"field": "Region.Name"}, {"field": "Region_Name"}], "measures": [{"field": "Amount"}]}),
        );

        let mut row = Record::new();
        row.insert("Region.Name".into(), json!("EMEA"));
        row.insert("Region_Name".into(), json!("emea"));
        row.insert("Amount".into(), json!(5));
        let mut account_row = Record::new();
        account_row.insert("Owner.Name".into(), json!("Ada"));

        InMemorySource::new()
            .with_bundle(bundle)
            .with_dataset(opportunity, json!({"type": "main"}), vec![row])
            .with_dataset(
                account,
                json!({"type": "main", "dimensions": [{"field": "Owner.Name"}]}),
                vec![account_row],
            )
    }

    #[tokio::test]
    async fn the_one_where_missing_xmds_come_from_the_version_endpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = a_source();
        let mut ctx = a_context(dir.path());
        let resolution = resolver::resolve(&source, &["Sales".to_string()]).await?;
        let mut merged = merge(&resolution);

        let inventories = build_plans(&source, &mut merged, &mut ctx, &RenameConfig::default()).await?;
        assert_eq!(inventories.len(), 2);
        assert_eq!(ctx.plans.cleaned("Account", "Owner.Name"), Some("OwnerDOTName"));
        assert_eq!(ctx.plans.cleaned("Opportunity", "Region.Name"), Some("RegionDOTName"));
        assert_eq!(ctx.plans.cleaned("Opportunity", "Region_Name"), Some("RegionName"));
        assert_eq!(
            ctx.plan_for("Account").map(|plan| plan.target_dataset.as_str()),
            Some("Account_ABC")
        );
        assert!(merged.xmds.contains_key("0Fb2"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_two_datasets_export_side_by_side() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = a_source();
        let mut ctx = a_context(dir.path());
        ctx.layout.create()?;
        let resolution = resolver::resolve(&source, &["Sales".to_string()]).await?;
        let mut merged = merge(&resolution);
        build_plans(&source, &mut merged, &mut ctx, &RenameConfig::default()).await?;

        let config = ExportConfig {
            parallelism: 2,
            ..Default::default()
        };
        let exports = export_datasets(
            Exporter::Query(&source),
            &merged,
            &ctx,
            &config,
            &RetryPolicy::once(),
        )
        .await?;
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].dataset, "Account");
        assert_eq!(exports[1].header, vec!["RegionDOTName", "RegionName", "Amount"]);
        assert!(ctx.layout.external_file("Opportunity_ABC", "csv").exists());
        Ok(())
    }
}
