//! 🛠️ CLI-mode export: `rows:fetch` does the fetching, we fix the header.

use anyhow::{Context, Result};
use tracing::info;

use super::{ExportConfig, ExportJob, ExportedDataset, SAMPLE_ROWS, csv_writer};
use crate::backends::SfdxCli;
use crate::progress::format_number;
use crate::transforms::{PeriodPolicy, clean_field_name};

pub async fn export(
    sfdx: &SfdxCli,
    username: &str,
    period_policy: PeriodPolicy,
    job: ExportJob<'_>,
    config: &ExportConfig,
) -> Result<ExportedDataset> {
    let dataset = job.dataset;
    let raw = sfdx
        .rows_fetch(username, &dataset.name, config.row_ceiling)
        .await?;
    let exported = rewrite(&raw, job, period_policy)?;
    info!(
        "📄 {} → {} ({} rows via rows:fetch)",
        dataset.name,
        job.csv_path.display(),
        format_number(exported.rows)
    );
    Ok(exported)
}

/// ✏️ Re-quotes the CSV and renames the header through the plan.
///
/// Columns the plan has never heard of still get cleaned, so the loader does
/// not choke on a stray `.`.
fn rewrite(raw: &str, job: ExportJob<'_>, period_policy: PeriodPolicy) -> Result<ExportedDataset> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(raw.as_bytes());
    let header: Vec<String> = reader
        .headers()
        .with_context(|| format!("💀 rows:fetch for {} returned no header", job.dataset.name))?
        .iter()
        .map(|column| match job.plan.cleaned(column) {
            Some(cleaned) => cleaned.to_string(),
            None => clean_field_name(column, period_policy),
        })
        .collect();

    let mut writer = csv_writer(job.csv_path)?;
    writer.write_record(&header)?;
    let mut exported = ExportedDataset {
        dataset: job.dataset.name.clone(),
        files: vec![job.csv_path.to_path_buf()],
        header,
        ..Default::default()
    };
    for record in reader.records() {
        let record = record
            .with_context(|| format!("💀 rows:fetch for {} returned a broken row", job.dataset.name))?;
        writer.write_record(&record)?;
        if exported.sample.len() < SAMPLE_ROWS {
            exported.sample.push(record.iter().map(str::to_owned).collect());
        }
        exported.rows += 1;
    }
    writer
        .flush()
        .with_context(|| format!("💀 Could not flush {}", job.csv_path.display()))?;
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backends::{CommandOutput, ScriptedRunner};
    use crate::common::{DatasetRef, FieldKind};
    use crate::retry::RetryPolicy;
    use crate::transforms::{DatasetRenamePlan, FieldRename};

    #[tokio::test]
    async fn the_one_where_the_header_learns_its_new_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = dir.path().join("Opportunity_ABC.csv");
        let runner = Arc::new(ScriptedRunner::new().on(
            "analytics:dataset:rows:fetch",
            CommandOutput::ok("Region.Name,Amount,Owner.Role\nEMEA,10,VP\nAPAC,20,\n"),
        ));
        let sfdx = SfdxCli::new("sfdx", runner.clone(), RetryPolicy::once());
        let plan = DatasetRenamePlan::from_renames(
            "Opportunity",
            "Opportunity_ABC",
            [FieldRename {
                original: "Region.Name".into(),
                cleaned: "RegionDOTName".into(),
                kind: FieldKind::Dimension,
            }],
        );
        let dataset = DatasetRef {
            name: "Opportunity".into(),
            ..Default::default()
        };
        let job = ExportJob {
            dataset: &dataset,
            plan: &plan,
            csv_path: &csv_path,
        };

        let exported = export(&sfdx, "me", PeriodPolicy::Marker, job, &ExportConfig::default()).await?;
        assert_eq!(exported.header, vec!["RegionDOTName", "Amount", "OwnerDOTRole"]);
        assert_eq!(exported.rows, 2);
        let written = std::fs::read_to_string(&csv_path)?;
        assert!(written.contains("\"APAC\",\"20\",\"\"\r\n"), "{written}");
        assert_eq!(
            runner.calls().await[0],
            vec!["analytics:dataset:rows:fetch", "-u", "me", "-n", "Opportunity", "-r", "csv", "--limit", "5000000"]
        );
        Ok(())
    }
}
