//! Fetch backends.
//!
//! A [`Fetcher`] turns a url into a file on disk. Implementations are
//! blocking: the dispatcher runs them on tokio's blocking pool and they
//! report progress through the [`ProgressSink`] they are handed, which is
//! safe to use from any thread.

pub mod media;
pub mod ytdlp;

use std::io;

use serde_json::Value;
use thiserror::Error;

use crate::queue::{JobId, JobResult, ProgressSink};

pub use ytdlp::YtDlpFetcher;

/// Everything a fetcher needs to download one job
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: JobId,
    pub url: String,
    pub format_selector: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("URL is required")]
    MissingUrl,

    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("{message}")]
    Process {
        message: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("download finished without reporting a file")]
    MissingResult { stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("fetch task aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Diagnostic text stored as the job's traceback
    pub fn diagnostic(&self) -> String {
        match self {
            FetchError::Process { stderr, code, .. } => match code {
                Some(code) => format!("exit code {code}\n{stderr}"),
                None => format!("terminated by signal\n{stderr}"),
            },
            FetchError::MissingResult { stderr } => stderr.clone(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("URL is required")]
    MissingUrl,

    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("{message}")]
    Process { message: String, stderr: String },

    #[error("invalid metadata: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("no metadata returned")]
    NoMetadata,

    #[error("probe task aborted: {0}")]
    Aborted(String),
}

/// Download backend used by the dispatcher and the metadata endpoints
pub trait Fetcher: Send + Sync {
    /// Download `request.url`, blocking until the file is in place.
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> Result<JobResult, FetchError>;

    /// Extract metadata for a url without downloading it.
    fn probe(&self, url: &str) -> Result<Value, ProbeError>;
}

/// Last `ERROR:` line of a stderr dump, without the prefix.
pub(crate) fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:"))
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}
