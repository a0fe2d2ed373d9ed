//! 🔌 Backends: the two doors out of this process.
//!
//! 🎬 *[the pipeline knocks on the wave API. the wave API asks for a token.
//! the token lives in the sfdx CLI. the sfdx CLI wants a browser.]*
//!
//! - [`AnalyticsSource`]: read-only access to a CRM Analytics org (bundles,
//!   dataset versions, SAQL queries, dataset listing). [`SourceBackend`] picks
//!   the REST client for real runs or in-memory fixtures for tests.
//! - [`sfdx`]: the subprocess surface (login, org display, listings, deploy,
//!   auto-install), behind a [`CommandRunner`](sfdx::CommandRunner) so tests
//!   never spawn anything.
//!
//! ## Knowledge Graph 🧠
//! - Used by: `resolver` (bundles), `fetcher` (versions), `export` (query), `supervisor` (wiring)
//! - Every outbound call goes through `retry::RetryPolicy`

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::common::{DashboardBundle, DatasetRef};

pub mod in_mem;
pub mod sfdx;
pub mod wave_rest;

pub use in_mem::InMemorySource;
pub use sfdx::{CommandOutput, CommandRunner, ScriptedRunner, SfdxCli, SystemRunner};
pub use wave_rest::WaveRestSource;

/// 🎯 Skip the selection menu: migrate these, by API name.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    #[serde(default)]
    pub dashboards: Vec<String>,
    #[serde(default)]
    pub apps: Vec<String>,
}

/// 🔧 The `[source]` table of the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// 🔑 sfdx alias or username; a browser login happens when absent
    #[serde(default)]
    pub target_org: Option<String>,
    /// 🌐 both from `force:org:display` when absent
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub selection: Option<Selection>,
}

fn default_api_version() -> String {
    "58.0".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            target_org: None,
            instance_url: None,
            access_token: None,
            api_version: default_api_version(),
            selection: None,
        }
    }
}

/// 📚 One row of a SAQL result.
pub type Record = Map<String, Value>;

#[async_trait]
pub trait AnalyticsSource: std::fmt::Debug + Send + Sync {
    /// 🎁 `wave/dashboards/{id or name}/bundle`
    async fn dashboard_bundle(&self, dashboard: &str) -> Result<DashboardBundle>;

    /// 🧬 `wave/datasets/{id}/versions/{version}`, the payload that carries `xmdMain`.
    async fn dataset_version(&self, dataset_id: &str, version_id: &str) -> Result<Value>;

    /// 🔢 `currentVersionId` of `wave/datasets/{id}`.
    async fn dataset_current_version(&self, dataset_id: &str) -> Result<String>;

    /// 🔎 `wave/query`: one page of SAQL results.
    async fn query(&self, saql: &str) -> Result<Vec<Record>>;

    /// 📋 Every dataset in the org, following `nextPageUrl` until it runs out.
    async fn list_datasets(&self) -> Result<Vec<DatasetRef>>;
}

#[derive(Debug)]
pub enum SourceBackend {
    InMemory(InMemorySource),
    WaveRest(WaveRestSource),
}

#[async_trait]
impl AnalyticsSource for SourceBackend {
    async fn dashboard_bundle(&self, dashboard: &str) -> Result<DashboardBundle> {
        match self {
            SourceBackend::InMemory(source) => source.dashboard_bundle(dashboard).await,
            SourceBackend::WaveRest(source) => source.dashboard_bundle(dashboard).await,
        }
    }

    async fn dataset_version(&self, dataset_id: &str, version_id: &str) -> Result<Value> {
        match self {
            SourceBackend::InMemory(source) => source.dataset_version(dataset_id, version_id).await,
            SourceBackend::WaveRest(source) => source.dataset_version(dataset_id, version_id).await,
        }
    }

    async fn dataset_current_version(&self, dataset_id: &str) -> Result<String> {
        match self {
            SourceBackend::InMemory(source) => source.dataset_current_version(dataset_id).await,
            SourceBackend::WaveRest(source) => source.dataset_current_version(dataset_id).await,
        }
    }

    async fn query(&self, saql: &str) -> Result<Vec<Record>> {
        match self {
            SourceBackend::InMemory(source) => source.query(saql).await,
            SourceBackend::WaveRest(source) => source.query(saql).await,
        }
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>> {
        match self {
            SourceBackend::InMemory(source) => source.list_datasets().await,
            SourceBackend::WaveRest(source) => source.list_datasets().await,
        }
    }
}
