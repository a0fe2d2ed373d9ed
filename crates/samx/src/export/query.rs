//! 📡 Query-mode export: SAQL pages, renamed on the way out.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use super::{ExportConfig, ExportJob, ExportedDataset, SAMPLE_ROWS, cell_text, csv_writer};
use crate::backends::AnalyticsSource;
use crate::progress::{ExportProgress, format_number};
use crate::retry::RetryPolicy;
use crate::transforms::DatasetRenamePlan;

/// 🧾 `q = load "<id>/<version>"; q = foreach q generate 'orig' as 'clean', ...; q = offset q N; q = limit q P;`
pub fn page_query(
    dataset_id: &str,
    version: &str,
    plan: &DatasetRenamePlan,
    offset: u64,
    limit: u64,
) -> String {
    let projection = plan
        .columns()
        .iter()
        .map(|rename| format!("'{}' as '{}'", rename.original, rename.cleaned))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "q = load \"{dataset_id}/{version}\"; q = foreach q generate {projection}; q = offset q {offset}; q = limit q {limit};"
    )
}

pub async fn export(
    source: &dyn AnalyticsSource,
    job: ExportJob<'_>,
    config: &ExportConfig,
    retry: &RetryPolicy,
) -> Result<ExportedDataset> {
    let dataset = job.dataset;
    let version = match &dataset.version {
        Some(version) => version.clone(),
        None => source.dataset_current_version(&dataset.id).await?,
    };
    let header: Vec<String> = job
        .plan
        .columns()
        .iter()
        .map(|rename| rename.cleaned.clone())
        .collect();

    let mut writer = csv_writer(job.csv_path)?;
    writer
        .write_record(&header)
        .with_context(|| format!("💀 Could not write the header of {}", job.csv_path.display()))?;

    let mut exported = ExportedDataset {
        dataset: dataset.name.clone(),
        files: vec![job.csv_path.to_path_buf()],
        header,
        ..Default::default()
    };
    if exported.header.is_empty() {
        warn!("🫥 {} has no fields in its xmd, exporting an empty file", dataset.name);
        writer.flush()?;
        return Ok(exported);
    }

    let mut progress = ExportProgress::new(&dataset.name, config.row_ceiling);
    let page_size = config.page_size.max(1);
    while exported.rows < config.row_ceiling {
        let limit = page_size.min(config.row_ceiling - exported.rows);
        let saql = &page_query(&dataset.id, &version, job.plan, exported.rows, limit);
        let label = format!("export {} @ row {}", dataset.name, exported.rows);
        let page = retry.run(&label, move || source.query(saql)).await?;

        for record in &page {
            let mut row = Vec::with_capacity(exported.header.len());
            for column in &exported.header {
                let cell = record.get(column);
                if matches!(cell, Some(Value::Array(_))) && !exported.multi_value.contains(column) {
                    exported.multi_value.insert(column.clone());
                }
                row.push(cell.map(cell_text).unwrap_or_default());
            }
            writer
                .write_record(&row)
                .with_context(|| format!("💀 Could not append to {}", job.csv_path.display()))?;
            if exported.sample.len() < SAMPLE_ROWS {
                exported.sample.push(row);
            }
        }

        let got = page.len() as u64;
        progress.page(got);
        exported.rows += got;
        // -- a short page is the last page
        if got < limit {
            break;
        }
    }
    writer
        .flush()
        .with_context(|| format!("💀 Could not flush {}", job.csv_path.display()))?;
    progress.finish();

    info!(
        "📄 {} → {} ({} rows in {} pages)",
        dataset.name,
        job.csv_path.display(),
        format_number(exported.rows),
        progress.pages()
    );
    Ok(exported)
}
