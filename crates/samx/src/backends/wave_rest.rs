//! 🌐 WaveRestSource: the CRM Analytics REST API over `reqwest`.
//!
//! Base URL is `{instance}/services/data/v{api}/`, auth is a bearer token from
//! `force:org:display`. GETs go through the run's retry policy (queries are
//! retried a page at a time by the exporter), and any non-2xx becomes a [`SamxError::HttpStatus`] so the policy can tell a
//! 503 (try again) from a 401 (go home).
//!
//! 🧪 Bundles arrive HTML-escaped inside JSON strings. Yes, really. They are
//! unescaped before parsing.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::{AnalyticsSource, Record};
use crate::common::{DashboardBundle, DatasetRef};
use crate::errors::SamxError;
use crate::retry::RetryPolicy;

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|amp|lt|gt|apos|quot|nbsp);")
        .expect("valid regex")
});

/// 🧼 `&quot;` and `&#92;` first (they live inside JSON strings and must stay escaped), then the rest.
pub fn unescape_bundle(body: &str) -> String {
    let body = body.replace("&quot;", "\\\"").replace("&#92;", "\\\\");
    ENTITY
        .replace_all(&body, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "apos" => Some('\''),
                "quot" => Some('"'),
                "nbsp" => Some('\u{a0}'),
                numeric => {
                    let digits = &numeric[1..];
                    let code = match digits.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => digits.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

#[derive(Debug, Deserialize)]
struct DatasetPage {
    #[serde(default)]
    datasets: Vec<DatasetRef>,
    #[serde(default, rename = "nextPageUrl")]
    next_page_url: Option<String>,
}

#[derive(Debug)]
pub struct WaveRestSource {
    client: reqwest::Client,
    instance_url: String,
    base_url: String,
    access_token: String,
    retry: RetryPolicy,
}

impl WaveRestSource {
    pub fn new(
        instance_url: &str,
        access_token: &str,
        api_version: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .context("💀 The HTTP client refused to be born. Probably the TLS stack having a bad day.")?;
        let instance_url = instance_url.trim_end_matches('/').to_string();
        let base_url = format!("{instance_url}/services/data/v{api_version}/");
        Ok(Self {
            client,
            instance_url,
            base_url,
            access_token: access_token.to_string(),
            retry,
        })
    }

    /// 🧭 Relative paths hang off the versioned base; `/services/...` (as in `nextPageUrl`) off the instance.
    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.instance_url)
        } else {
            format!("{}{path}", self.base_url)
        }
    }

    async fn send_once(&self, url: &str, body: Option<&str>) -> Result<String> {
        let request = match body {
            Some(body) => self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .body(body.to_string()),
            None => self.client.get(url),
        };
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("💀 {url} never answered. The network is giving us the silent treatment."))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("💀 {url} answered but the body got lost on the way"))?;
        if !status.is_success() {
            return Err(SamxError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body: text,
            }
            .into());
        }
        trace!("📡 {url} → {} bytes", text.len());
        Ok(text)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = &self.url(path);
        self.retry
            .run(&format!("GET {path}"), move || self.send_once(url, None))
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.get_text(path).await?;
        serde_json::from_str(&text)
            .with_context(|| format!("💀 GET {path} returned something that is not the JSON we expected"))
    }
}

#[async_trait]
impl AnalyticsSource for WaveRestSource {
    async fn dashboard_bundle(&self, dashboard: &str) -> Result<DashboardBundle> {
        debug!("🎁 fetching bundle for {dashboard}");
        let path = format!("wave/dashboards/{dashboard}/bundle");
        let raw = self.get_text(&path).await?;
        serde_json::from_str(&unescape_bundle(&raw)).with_context(|| {
            format!("💀 The bundle of '{dashboard}' did not survive unescaping. The HTML entities won this round.")
        })
    }

    async fn dataset_version(&self, dataset_id: &str, version_id: &str) -> Result<Value> {
        self.get_json(&format!("wave/datasets/{dataset_id}/versions/{version_id}"))
            .await
    }

    async fn dataset_current_version(&self, dataset_id: &str) -> Result<String> {
        let dataset: Value = self.get_json(&format!("wave/datasets/{dataset_id}")).await?;
        dataset
            .get("currentVersionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SamxError::UnknownDataset(dataset_id.to_string()).into())
    }

    async fn query(&self, saql: &str) -> Result<Vec<Record>> {
        // -- one shot: the exporter retries whole pages, it knows what a sleepy dataset looks like
        let url = self.url("wave/query");
        let body = json!({ "query": saql }).to_string();
        let text = self.send_once(&url, Some(&body)).await?;
        let mut response: Value = serde_json::from_str(&text)
            .context("💀 wave/query returned something that is not JSON. SAQL is hard, JSON should not be.")?;
        let records = match response.pointer_mut("/results/records") {
            Some(Value::Array(records)) => std::mem::take(records),
            _ => Vec::new(),
        };
        Ok(records
            .into_iter()
            .filter_map(|record| match record {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>> {
        let mut the_datasets = Vec::new();
        let mut next = Some("wave/datasets?pageSize=25".to_string());
        while let Some(path) = next {
            let page: DatasetPage = self.get_json(&path).await?;
            the_datasets.extend(page.datasets);
            next = page.next_page_url.filter(|url| !url.is_empty());
        }
        debug!("📋 {} datasets listed", the_datasets.len());
        Ok(the_datasets)
    }
}
