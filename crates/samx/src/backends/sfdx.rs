//! 🛠️ The sfdx CLI, as a subprocess, behind a trait.
//!
//! [`SfdxCli`] knows the argument strings; a [`CommandRunner`] knows how to
//! spawn things. Real runs use [`SystemRunner`] (`tokio::process`), tests use
//! [`ScriptedRunner`] which hands back canned output and writes down every
//! call so the assertions can read the minutes of the meeting.
//!
//! A non-zero exit is a [`SamxError::CommandFailed`]. So is a zero exit whose
//! stderr says the dataset needs waking up, because the CLI is like that.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::{AppSummary, DashboardSummary};
use crate::errors::{NOT_QUERIED_RECENTLY, SamxError};
use crate::retry::RetryPolicy;

/// 🆔 Something shaped like a Salesforce record id, in 15 or 18 characters.
static RECORD_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0[A-Za-z0-9]{14}(?:[A-Za-z0-9]{3})?\b").expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Debug + Send + Sync {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput>;
}

/// 🚀 Spawns for real and waits for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
        let mut command = tokio::process::Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command.output().await.with_context(|| {
            format!("💀 Could not start `{program}`. Is it installed and on the PATH? It is always the PATH.")
        })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// 🎭 Canned output per subcommand (the first argument), served in order.
///
/// An unscripted subcommand succeeds with `{"status":0,"result":{}}`, which is
/// what `deploy` and `org:open` look like when nobody cares about their output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<BTreeMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<(Vec<String>, Option<PathBuf>)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, subcommand: &str, output: CommandOutput) -> Self {
        self.responses
            .get_mut()
            .entry(subcommand.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// 📝 Arguments of every call, in order.
    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().await.iter().map(|(args, _)| args.clone()).collect()
    }

    pub async fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .await
            .into_iter()
            .filter(|args| args.first().map(String::as_str) == Some(subcommand))
            .collect()
    }

    /// 📂 Working directory of the first call to `subcommand`.
    pub async fn cwd_of(&self, subcommand: &str) -> Option<PathBuf> {
        self.calls
            .lock()
            .await
            .iter()
            .find(|(args, _)| args.first().map(String::as_str) == Some(subcommand))
            .and_then(|(_, cwd)| cwd.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, _program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
        self.calls
            .lock()
            .await
            .push((args.to_vec(), cwd.map(Path::to_path_buf)));
        let subcommand = args.first().cloned().unwrap_or_default();
        let scripted = self
            .responses
            .lock()
            .await
            .get_mut(&subcommand)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| CommandOutput::ok(r#"{"status":0,"result":{}}"#)))
    }
}

/// 🔑 Who `auth:web:login` logged us in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgLogin {
    pub username: String,
    pub org_id: String,
}

/// 🌐 What the REST client needs, straight from `force:org:display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgDisplay {
    pub access_token: String,
    pub instance_url: String,
}

#[derive(Debug, Clone)]
pub struct SfdxCli {
    program: String,
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
}

impl SfdxCli {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>, retry: RetryPolicy) -> Self {
        Self {
            program: program.into(),
            runner,
            retry,
        }
    }

    async fn exec(&self, args: &[&str], cwd: Option<&Path>, retry: &RetryPolicy) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let label = format!("{} {}", self.program, args.first().map(String::as_str).unwrap_or_default());
        let args = &args;
        retry
            .run(&label, move || async move {
                debug!("🛠️ {} {}", self.program, args.join(" "));
                let output = self.runner.run(&self.program, args, cwd).await?;
                if !output.success() || output.stderr.contains(NOT_QUERIED_RECENTLY) {
                    return Err(SamxError::CommandFailed {
                        program: self.program.clone(),
                        args: args.join(" "),
                        code: output.code,
                        stderr: output.stderr,
                    }
                    .into());
                }
                Ok(output)
            })
            .await
    }

    /// 📦 `--json` commands wrap their payload in `{"status":0,"result":...}`.
    async fn json<T: DeserializeOwned>(&self, args: &[&str], retry: &RetryPolicy) -> Result<T> {
        let output = self.exec(args, None, retry).await?;
        let mut envelope: Value = serde_json::from_str(&output.stdout).with_context(|| {
            format!("💀 `{} {}` printed something that is not JSON", self.program, args.join(" "))
        })?;
        let result = envelope.get_mut("result").map(Value::take).unwrap_or(Value::Null);
        serde_json::from_value(result).with_context(|| {
            format!("💀 `{} {}` answered in a shape we did not expect", self.program, args.join(" "))
        })
    }

    /// 🌍 Opens a browser and waits for the operator. Never retried, nobody wants two browser tabs.
    pub async fn login(&self) -> Result<OrgLogin> {
        info!("🌍 log in to the org in your browser, then come back here");
        let result: Value = self
            .json(&["auth:web:login", "--json"], &RetryPolicy::once())
            .await?;
        let field = |key: &str| result.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let login = OrgLogin {
            username: field("username"),
            org_id: field("orgId"),
        };
        info!("🔑 authorized {} with org id {}", login.username, login.org_id);
        Ok(login)
    }

    pub async fn org_display(&self, username: &str) -> Result<OrgDisplay> {
        let result: Value = self
            .json(&["force:org:display", "-u", username, "--json"], &self.retry)
            .await?;
        let field = |key: &str| {
            result
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .with_context(|| format!("💀 force:org:display for {username} has no {key}"))
        };
        Ok(OrgDisplay {
            access_token: field("accessToken")?,
            instance_url: field("instanceUrl")?,
        })
    }

    pub async fn app_list(&self, username: &str) -> Result<Vec<AppSummary>> {
        self.json(&["analytics:app:list", "-u", username, "--json"], &self.retry)
            .await
    }

    pub async fn dashboard_list(&self, username: &str) -> Result<Vec<DashboardSummary>> {
        self.json(&["analytics:dashboard:list", "-u", username, "--json"], &self.retry)
            .await
    }

    /// 📄 The dataset as CSV on stdout, at most `limit` rows.
    pub async fn rows_fetch(&self, username: &str, dataset: &str, limit: u64) -> Result<String> {
        let limit = limit.to_string();
        let output = self
            .exec(
                &["analytics:dataset:rows:fetch", "-u", username, "-n", dataset, "-r", "csv", "--limit", &limit],
                None,
                &self.retry,
            )
            .await?;
        Ok(output.stdout)
    }

    /// 🚚 Run from the sfdx project root, where `sfdx-project.json` lives. One shot.
    pub async fn deploy(&self, username: &str, template: &str, project_root: &Path) -> Result<()> {
        let bundle = format!("WaveTemplateBundle:{template}");
        self.exec(
            &["force:source:deploy", "-m", &bundle, "-u", username],
            Some(project_root),
            &RetryPolicy::once(),
        )
        .await?;
        Ok(())
    }

    /// 🤖 Kicks off the unattended install; returns the id of the app being created.
    /// One shot: a second call is a second app.
    pub async fn autoinstall(&self, username: &str, template: &str) -> Result<String> {
        let output = self
            .exec(
                &["analytics:autoinstall:app:create", "-n", template, "-u", username, "--json"],
                None,
                &RetryPolicy::once(),
            )
            .await?;
        let from_json = serde_json::from_str::<Value>(&output.stdout).ok().and_then(|envelope| {
            ["/result/folderId", "/result/id"]
                .iter()
                .find_map(|pointer| envelope.pointer(pointer).and_then(Value::as_str).map(str::to_owned))
        });
        from_json
            .or_else(|| RECORD_ID.find(&output.stdout).map(|id| id.as_str().to_string()))
            .with_context(|| format!("💀 The auto-install of {template} started but never told us the app id"))
    }

    pub async fn org_open(&self, username: &str, path: &str) -> Result<()> {
        self.exec(&["force:org:open", "-p", path, "-u", username], None, &self.retry)
            .await?;
        Ok(())
    }
}
