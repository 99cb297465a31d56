//! Removal of files left behind by cancelled jobs.
//!
//! Cleanup is best effort: every failure is logged and swallowed, and a
//! missing file is not a failure at all.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::queue::{Job, JobId, JobResult};

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to scan {dir}: {source}")]
    Scan {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What is known about a cancelled job's files
#[derive(Debug, Clone, Default)]
pub struct CleanupTarget {
    pub job_id: JobId,
    pub url: String,
    /// Final output file, when the fetch got that far
    pub artifact: Option<PathBuf>,
    /// Media id used to recognise the job's files by name
    pub token: Option<String>,
    /// Partial files reported through progress
    pub partials: Vec<PathBuf>,
}

impl CleanupTarget {
    pub fn from_job(job: &Job, discarded: Option<&JobResult>) -> Self {
        let result = discarded.or(job.result.as_ref());
        let token = result
            .map(|result| result.id.clone())
            .filter(|id| is_usable_token(id))
            .or_else(|| job.source_id.clone().filter(|id| is_usable_token(id)));

        Self {
            job_id: job.id.clone(),
            url: job.url.clone(),
            artifact: result.map(|result| result.filepath.clone()),
            token,
            partials: job.artifacts.clone(),
        }
    }
}

fn is_usable_token(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty() && id != "unknown" && id != "NA"
}

#[async_trait]
pub trait Cleanup: Send + Sync {
    async fn cleanup(&self, target: &CleanupTarget);
}

/// Does nothing; for setups that keep every file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCleanup;

#[async_trait]
impl Cleanup for NoopCleanup {
    async fn cleanup(&self, target: &CleanupTarget) {
        debug!(job_id = %target.job_id, "Cleanup skipped");
    }
}

/// Filesystem cleanup under the download directory.
///
/// Steps, in order:
/// 1. the final artifact, if one was produced
/// 2. partial files the fetcher reported, when inside the output directory
/// 3. the job's scratch directory
/// 4. temporary files in the output directory whose name carries the
///    job's media id; without an id, files with a temporary suffix modified
///    within the recent window instead
pub struct FsCleanup {
    output_dir: PathBuf,
    scratch_root: PathBuf,
    temp_suffixes: Vec<String>,
    recent_window: Duration,
}

impl FsCleanup {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        scratch_root: impl Into<PathBuf>,
        temp_suffixes: Vec<String>,
        recent_window: Duration,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            scratch_root: scratch_root.into(),
            temp_suffixes,
            recent_window,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.downloads.output_dir.clone(),
            config.downloads.scratch_root(),
            config.cleanup.temp_suffixes.clone(),
            Duration::from_secs(config.cleanup.recent_window_secs),
        )
    }

    /// Whether a file name looks like a download leftover
    pub fn is_temporary(&self, name: &str) -> bool {
        self.has_temp_suffix(name) || name.contains(".temp.") || is_format_stream(name)
    }

    /// Configured temporary suffixes and fragment files only. Finished
    /// downloads never match, whatever their title.
    pub fn has_temp_suffix(&self, name: &str) -> bool {
        self.temp_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
            || name.contains(".part-Frag")
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<bool, CleanupError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed file");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CleanupError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn remove_scratch(&self, job_id: &str) -> Result<bool, CleanupError> {
        if job_id.is_empty() {
            return Ok(false);
        }
        let dir = self.scratch_root.join(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CleanupError::Remove { path: dir, source }),
        }
    }

    /// Remove files in the output directory selected by `matches`.
    async fn sweep<F>(&self, matches: F) -> Result<usize, CleanupError>
    where
        F: Fn(&str, SystemTime) -> bool + Send + Sync,
    {
        let scan_error = |source| CleanupError::Scan {
            dir: self.output_dir.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(scan_error(err)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
            if matches(name, modified) {
                removed += swallow(self.remove_file(&entry.path()).await);
            }
        }
        Ok(removed)
    }

    fn is_recent(&self, modified: SystemTime) -> bool {
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age <= self.recent_window,
            // modified in the future
            Err(_) => true,
        }
    }
}

#[async_trait]
impl Cleanup for FsCleanup {
    async fn cleanup(&self, target: &CleanupTarget) {
        let mut removed = 0usize;

        if let Some(artifact) = &target.artifact {
            removed += swallow(self.remove_file(artifact).await);
        }

        for partial in &target.partials {
            let path = self.resolve(partial);
            if path.starts_with(&self.output_dir) {
                removed += swallow(self.remove_file(&path).await);
            } else {
                debug!(path = %path.display(), "Partial outside output directory left alone");
            }
        }

        removed += swallow(self.remove_scratch(&target.job_id).await);

        let swept = match &target.token {
            Some(token) => {
                self.sweep(|name, _| name.contains(token.as_str()) && self.is_temporary(name))
                    .await
            }
            None => {
                self.sweep(|name, modified| {
                    self.has_temp_suffix(name) && self.is_recent(modified)
                })
                .await
            }
        };
        removed += swallow(swept);

        info!(job_id = %target.job_id, url = %target.url, removed, "Cleanup finished");
    }
}

/// Intermediate format stream, e.g. "clip [id].f137.mp4"
fn is_format_stream(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() > 2
        && segments[1..segments.len() - 1].iter().any(|segment| {
            segment.len() > 1
                && segment.starts_with('f')
                && segment[1..].chars().all(|c| c.is_ascii_digit())
        })
}

/// Log a cleanup error and turn the outcome into a count
fn swallow<T: Into<CountRemoved>>(outcome: Result<T, CleanupError>) -> usize {
    match outcome {
        Ok(value) => value.into().0,
        Err(err) => {
            warn!(error = %err, "Cleanup step failed");
            0
        }
    }
}

struct CountRemoved(usize);

impl From<bool> for CountRemoved {
    fn from(removed: bool) -> Self {
        CountRemoved(usize::from(removed))
    }
}

impl From<usize> for CountRemoved {
    fn from(count: usize) -> Self {
        CountRemoved(count)
    }
}
