//! 🔁 Retry: one policy to wrap every call that leaves the process.
//!
//! HTTP requests to the wave API, `sfdx` subprocesses, dataset exports: they
//! all go through [`RetryPolicy::run`]. The policy decides how many attempts
//! and how long to nap between them. The classifier ([`is_retryable`]) decides
//! whether a failure is worth another attempt at all.
//!
//! ⚠️ Max attempts is a ceiling, not a suggestion. A dataset that refuses to
//! wake up after five tries gets reported, not begged.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::SamxError;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// 🧱 same nap every time
    Fixed,
    /// 📈 initial, 2x, 4x, ... capped at `max_backoff_ms`
    #[default]
    Exponential,
}

/// 🔧 The `[retry]` table of the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    backoff: Backoff,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            // -- zero attempts would mean "never call anything", which is a different product
            max_attempts: config.max_attempts.max(1),
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            backoff: config.backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// 🚫 One attempt, no naps. Handy for interactive commands like a browser login.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial: Duration::ZERO,
            max: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// ⏱️ How long to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial,
            Backoff::Exponential => {
                let the_multiplier = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.initial.saturating_mul(the_multiplier).min(self.max)
            }
        }
    }

    /// 🚀 Run `op` until it succeeds, fails for a non-retryable reason, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("✅ {label} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    let the_nap = self.delay_after(attempt);
                    warn!(
                        "🔁 {label} failed on attempt {attempt}/{}: {err:#}. retrying in {:?}",
                        self.max_attempts, the_nap
                    );
                    tokio::time::sleep(the_nap).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "💀 {label} gave up after {attempt} attempt(s)"
                    )));
                }
            }
        }
    }
}

/// 🕵️ Walks the error chain looking for something that smells temporary.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(samx) = cause.downcast_ref::<SamxError>() {
            return samx.is_transient();
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return http.is_timeout() || http.is_connect() || http.is_request();
        }
        false
    })
}
