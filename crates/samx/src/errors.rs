//! 🏷️ Errors with names.
//!
//! Most of samx is happy with `anyhow` and a nicely worded `.context(...)`.
//! But a few failures need to be recognised later, mostly by the retry loop,
//! which has to tell "the dataset is napping, try again" apart from
//! "your token expired, nothing will save you". Those get a real type here.
//!
//! 🦆 The duck filed a bug report once. It was closed as "working as intended".

use std::path::PathBuf;

use thiserror::Error;

/// 😴 What CRM Analytics says when a dataset has been idle long enough to need a nudge.
pub const NOT_QUERIED_RECENTLY: &str = "has not been queried in a while";

/// 🧾 Stderr/body fragments that mean "the network had a moment", not "you did something wrong".
const TRANSIENT_MARKERS: &[&str] = &[
    NOT_QUERIED_RECENTLY,
    "ECONNRESET",
    "ETIMEDOUT",
    "socket hang up",
    "Service Unavailable",
    "REQUEST_LIMIT_EXCEEDED",
];

#[derive(Debug, Error)]
pub enum SamxError {
    #[error("dataset export hit a transient failure: {0}")]
    TransientExport(String),

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("`{program} {args}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("required file is missing: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("dataset `{0}` is not part of this migration")]
    UnknownDataset(String),

    #[error("operator cancelled: {0}")]
    Cancelled(String),
}

impl SamxError {
    /// 🔁 Would asking again plausibly produce a different answer?
    pub fn is_transient(&self) -> bool {
        match self {
            SamxError::TransientExport(_) => true,
            SamxError::HttpStatus { status, body, .. } => {
                *status == 429 || *status >= 500 || is_transient_message(body)
            }
            SamxError::CommandFailed { stderr, .. } => is_transient_message(stderr),
            SamxError::MissingFile(_) | SamxError::UnknownDataset(_) | SamxError::Cancelled(_) => {
                false
            }
        }
    }
}

pub(crate) fn is_transient_message(text: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker))
}
