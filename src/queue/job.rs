//! Job records and the lifecycle state machine.
//!
//! A [`Job`] is created by enqueue, mutated only through the transition
//! methods below, and projected into a [`JobView`] for external readers.
//!
//! ```text
//! queued ──► running ──► done
//!   │           ├──────► error
//!   │           └──────► cancelled
//!   └──────────────────► cancelled
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::progress::{Progress, ProgressUpdate};

pub type JobId = String;

/// Message stored on a job cancelled by the user
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Done)
                | (Running, Error)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("job {id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Outcome of a successful fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub title: String,
    /// Source-provided media id (display only)
    pub id: String,
    pub filepath: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub traceback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Media id learned from progress callbacks, before any result exists
    pub source_id: Option<String>,
    /// Temporary files reported by the fetcher while running
    pub artifacts: Vec<PathBuf>,
}

impl Job {
    pub fn new(id: JobId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            status: JobStatus::Queued,
            progress: Progress::default(),
            result: None,
            error: None,
            traceback: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            source_id: None,
            artifacts: Vec::new(),
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: JobResult) -> Result<(), TransitionError> {
        self.transition(JobStatus::Done)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(
        &mut self,
        message: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Error)?;
        self.error = Some(message.into());
        self.traceback = Some(traceback.into());
        Ok(())
    }

    /// Cancelled jobs never carry a result or a traceback.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.result = None;
        self.traceback = None;
        self.error = Some(CANCELLED_MESSAGE.to_string());
        Ok(())
    }

    /// Merge a progress update; only running jobs accept progress.
    pub fn apply_progress(&mut self, update: ProgressUpdate) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        if let Some(source_id) = update.source_id.as_ref() {
            self.source_id = Some(source_id.clone());
        }
        for path in update.artifact_paths() {
            if !self.artifacts.contains(&path) {
                self.artifacts.push(path);
            }
        }
        self.progress.merge(&update);
        true
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            url: self.url.clone(),
            status: self.status,
            title: self.result.as_ref().map(|r| r.title.clone()),
            filepath: self.result.as_ref().map(|r| r.filepath.clone()),
            error: self.error.clone(),
            progress: self.progress.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only projection handed to API consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub title: Option<String>,
    pub filepath: Option<PathBuf>,
    pub error: Option<String>,
    pub progress: Progress,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
}
