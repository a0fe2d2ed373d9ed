//! 🧪 InMemorySource: an org that fits in a test function.
//!
//! Bundles, dataset versions and rows all live in maps. Queries are answered
//! by picking the `load`, `generate`, `offset` and `limit` statements out of
//! the SAQL and applying them to the fixture rows, which is about 4% of SAQL
//! and 100% of what the exporter sends.
//!
//! ⚠️ Not for production. If you point a real migration at this, the
//! template will install just fine and contain nothing. Ask me how I know.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{AnalyticsSource, Record};
use crate::common::{DashboardBundle, DatasetRef};
use crate::errors::{NOT_QUERIED_RECENTLY, SamxError};

static LOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"load\s+"([^"/]+)(?:/([^"]+))?""#).expect("valid regex"));
static GENERATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"generate\s+([^;]*);").expect("valid regex"));
static PROJECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']+)'\s+as\s+'([^']+)'").expect("valid regex"));
static OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"offset\s+\w+\s+(\d+)").expect("valid regex"));
static LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"limit\s+\w+\s+(\d+)").expect("valid regex"));

#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    bundles: BTreeMap<String, DashboardBundle>,
    datasets: Vec<DatasetRef>,
    // -- "<id>/<version>" → version payload
    versions: BTreeMap<String, Value>,
    rows: BTreeMap<String, Vec<Record>>,
    /// 😴 dataset id → how many more queries fail with the sleepy-dataset message
    naps: Arc<Mutex<BTreeMap<String, u32>>>,
    /// 📝 every bundle request, in order
    pub bundle_fetches: Arc<Mutex<Vec<String>>>,
    /// 📝 every SAQL statement received, in order
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🎁 Registered under the asset's name.
    pub fn with_bundle(mut self, bundle: DashboardBundle) -> Self {
        self.bundles.insert(bundle.name().to_string(), bundle);
        self
    }

    /// 🗃️ A dataset, its main xmd (served from the version endpoint) and its rows.
    pub fn with_dataset(mut self, dataset: DatasetRef, xmd_main: Value, rows: Vec<Record>) -> Self {
        let version = dataset.version.clone().unwrap_or_default();
        self.versions.insert(
            format!("{}/{version}", dataset.id),
            json!({"id": version, "xmdMain": xmd_main}),
        );
        self.rows.insert(dataset.id.clone(), rows);
        self.datasets.retain(|known| known.id != dataset.id);
        self.datasets.push(dataset);
        self
    }

    /// 😴 The next `times` queries against `dataset_id` fail the way a cold dataset does.
    pub fn with_nap(self, dataset_id: &str, times: u32) -> Self {
        if let Ok(mut naps) = self.naps.try_lock() {
            naps.insert(dataset_id.to_string(), times);
        }
        self
    }

    pub async fn fetch_count(&self, dashboard: &str) -> usize {
        self.bundle_fetches
            .lock()
            .await
            .iter()
            .filter(|name| *name == dashboard)
            .count()
    }

    fn answer(&self, saql: &str) -> Result<Vec<Record>> {
        let Some(load) = LOAD.captures(saql) else {
            return Ok(Vec::new());
        };
        let dataset_id = &load[1];
        let Some(rows) = self.rows.get(dataset_id) else {
            return Err(SamxError::UnknownDataset(dataset_id.to_string()).into());
        };
        let projection: Vec<(String, String)> = GENERATE
            .captures(saql)
            .map(|generate| {
                PROJECTION
                    .captures_iter(&generate[1])
                    .map(|pair| (pair[1].to_string(), pair[2].to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let number = |re: &Regex| -> Option<usize> {
            re.captures(saql).and_then(|caps| caps[1].parse().ok())
        };
        let offset = number(&OFFSET).unwrap_or(0);
        let limit = number(&LIMIT).unwrap_or(usize::MAX);

        Ok(rows
            .iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                if projection.is_empty() {
                    return row.clone();
                }
                projection
                    .iter()
                    .filter_map(|(original, alias)| {
                        row.get(original).map(|value| (alias.clone(), value.clone()))
                    })
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl AnalyticsSource for InMemorySource {
    async fn dashboard_bundle(&self, dashboard: &str) -> Result<DashboardBundle> {
        self.bundle_fetches.lock().await.push(dashboard.to_string());
        self.bundles.get(dashboard).cloned().ok_or_else(|| {
            SamxError::HttpStatus {
                status: 404,
                url: format!("wave/dashboards/{dashboard}/bundle"),
                body: "NOT_FOUND".into(),
            }
            .into()
        })
    }

    async fn dataset_version(&self, dataset_id: &str, version_id: &str) -> Result<Value> {
        self.versions
            .get(&format!("{dataset_id}/{version_id}"))
            .cloned()
            .ok_or_else(|| SamxError::UnknownDataset(dataset_id.to_string()).into())
    }

    async fn dataset_current_version(&self, dataset_id: &str) -> Result<String> {
        self.datasets
            .iter()
            .find(|dataset| dataset.id == dataset_id)
            .and_then(|dataset| dataset.version.clone())
            .ok_or_else(|| SamxError::UnknownDataset(dataset_id.to_string()).into())
    }

    async fn query(&self, saql: &str) -> Result<Vec<Record>> {
        self.queries.lock().await.push(saql.to_string());
        if let Some(load) = LOAD.captures(saql) {
            let mut naps = self.naps.lock().await;
            if let Some(remaining) = naps.get_mut(&load[1]).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(SamxError::HttpStatus {
                    status: 400,
                    url: "wave/query".into(),
                    body: format!("This dataset {NOT_QUERIED_RECENTLY}."),
                }
                .into());
            }
        }
        self.answer(saql)
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>> {
        Ok(self.datasets.clone())
    }
}
