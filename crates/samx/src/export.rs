//! 🚰 Export: dataset rows out of the source org, into CSV files the template can ship.
//!
//! Two ways to get the rows:
//! - [`ExportMode::Query`] pages through `wave/query` with a generated SAQL
//!   projection that renames the columns on the way out
//! - [`ExportMode::Cli`] asks `sfdx analytics:dataset:rows:fetch` for the whole
//!   thing and fixes the header afterwards
//!
//! Either way the CSV quotes every field, the header is the cleaned names,
//! the first hundred rows are kept for date sniffing, and a file above the
//! split threshold is cut into `__PART__<n>` files.
//!
//! ## Knowledge Graph 🧠
//! - Used by: `fetcher` (one export per dataset, `parallelism` at a time)
//! - Depends on: `backends` (query / rows:fetch), `retry`, `progress`, `transforms::names`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::backends::{AnalyticsSource, SfdxCli};
use crate::common::DatasetRef;
use crate::retry::RetryPolicy;
use crate::transforms::{DatasetRenamePlan, PeriodPolicy};

pub mod cli;
pub mod query;
pub mod split;

pub use split::split_csv;

/// 🔬 Rows kept in memory for date-format sniffing.
pub const SAMPLE_ROWS: usize = 100;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// 📡 `wave/query`, a page at a time
    #[default]
    Query,
    /// 🛠️ `analytics:dataset:rows:fetch`
    Cli,
}

/// 🔧 The `[export]` table of the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub mode: ExportMode,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_row_ceiling")]
    pub row_ceiling: u64,
    #[serde(default = "default_split_threshold_bytes")]
    pub split_threshold_bytes: u64,
    /// 🧵 datasets exported at the same time
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_page_size() -> u64 {
    100_000
}

fn default_row_ceiling() -> u64 {
    5_000_000
}

fn default_split_threshold_bytes() -> u64 {
    99_000_000
}

fn default_parallelism() -> usize {
    1
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: ExportMode::default(),
            page_size: default_page_size(),
            row_ceiling: default_row_ceiling(),
            split_threshold_bytes: default_split_threshold_bytes(),
            parallelism: default_parallelism(),
        }
    }
}

/// 📄 One dataset, on disk.
#[derive(Debug, Clone, Default)]
pub struct ExportedDataset {
    /// 🏷️ original dataset name
    pub dataset: String,
    /// 📁 the CSV file(s); more than one after a split
    pub files: Vec<PathBuf>,
    pub header: Vec<String>,
    /// 🔬 up to [`SAMPLE_ROWS`] rows, aligned with `header`
    pub sample: Vec<Vec<String>>,
    pub rows: u64,
    /// 🧵 columns that came back as arrays at least once, joined with [`MULTI_VALUE_SEPARATOR`]
    pub multi_value: BTreeSet<String>,
}

impl ExportedDataset {
    /// 🔬 Sampled values of one column, empty cells skipped.
    pub fn sample_values<'a>(&'a self, column: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        let index = self.header.iter().position(|name| name == column);
        self.sample
            .iter()
            .filter_map(move |row| index.and_then(|i| row.get(i)))
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

/// 🧩 What one dataset export needs to know.
#[derive(Debug, Clone, Copy)]
pub struct ExportJob<'a> {
    pub dataset: &'a DatasetRef,
    pub plan: &'a DatasetRenamePlan,
    /// 📄 `<external_files>/<target>.csv`
    pub csv_path: &'a Path,
}

/// 🎛️ The two ways out, picked once per run.
#[derive(Debug, Clone, Copy)]
pub enum Exporter<'a> {
    Query(&'a dyn AnalyticsSource),
    Cli {
        sfdx: &'a SfdxCli,
        username: &'a str,
        period_policy: PeriodPolicy,
    },
}

impl Exporter<'_> {
    /// 🚀 Rows to CSV, then split if it got too big.
    pub async fn export(
        &self,
        job: ExportJob<'_>,
        config: &ExportConfig,
        retry: &RetryPolicy,
    ) -> Result<ExportedDataset> {
        let mut exported = match self {
            Exporter::Query(source) => query::export(*source, job, config, retry).await?,
            Exporter::Cli {
                sfdx,
                username,
                period_policy,
            } => cli::export(sfdx, username, *period_policy, job, config).await?,
        };
        exported.files = split_csv(job.csv_path, config.split_threshold_bytes)?;
        Ok(exported)
    }
}

pub const MULTI_VALUE_SEPARATOR: &str = ";";

/// 🧵 A JSON cell as CSV text. Multi-value dimensions are joined with [`MULTI_VALUE_SEPARATOR`].
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(values) => values
            .iter()
            .map(cell_text)
            .collect::<Vec<_>>()
            .join(MULTI_VALUE_SEPARATOR),
        other => other.to_string(),
    }
}

/// ✍️ Every field quoted, `\r\n` line endings, matching the schema's `fileFormat`.
pub(crate) fn csv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::CRLF)
        .from_path(path)
        .with_context(|| format!("💀 Could not create {}. The disk said no.", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_cells_become_text() {
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!("EMEA")), "EMEA");
        assert_eq!(cell_text(&json!(42.5)), "42.5");
        assert_eq!(cell_text(&json!(["a", "b", 3])), "a;b;3");
        assert_eq!(cell_text(&json!(true)), "true");
    }

    #[test]
    fn the_one_where_the_sample_skips_blank_cells() {
        let exported = ExportedDataset {
            header: vec!["CloseDate".into(), "Stage".into()],
            sample: vec![
                vec!["".into(), "Won".into()],
                vec!["2024-01-31".into(), "Lost".into()],
            ],
            ..Default::default()
        };
        assert_eq!(exported.sample_values("CloseDate").collect::<Vec<_>>(), vec!["2024-01-31"]);
        assert_eq!(exported.sample_values("Nope").count(), 0);
    }
}
