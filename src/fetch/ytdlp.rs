//! yt-dlp backend.
//!
//! Runs the yt-dlp executable as a child process. Progress and the final
//! result are requested as JSON through `--progress-template` and `--print`,
//! each line tagged with a marker so it can be told apart from regular
//! output. Stderr is drained on a helper thread and its tail kept for
//! diagnostics.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::{FetchError, FetchRequest, Fetcher, ProbeError, last_error_line};
use crate::config::Config;
use crate::queue::{JobResult, ProgressSink, ProgressUpdate};

const PROGRESS_MARKER: &str = "vidqueue-progress ";
const SOURCE_ID_MARKER: &str = " vidqueue-id=";
const RESULT_MARKER: &str = "vidqueue-result ";

const PROGRESS_TEMPLATE: &str = "download:vidqueue-progress %(progress.{status,downloaded_bytes,total_bytes,total_bytes_estimate,speed,eta,tmpfilename,filename})j vidqueue-id=%(info.id)s";
const RESULT_TEMPLATE: &str = "after_move:vidqueue-result %(.{id,title,filepath})j";

/// Lines of stderr kept for the failure diagnostic
const STDERR_TAIL_LINES: usize = 200;

/// Placeholder for a title or id the extractor did not report
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone)]
pub struct YtDlpSettings {
    pub binary: String,
    pub output_dir: PathBuf,
    pub scratch_root: PathBuf,
    pub output_template: String,
    pub merge_output_format: String,
    pub restrict_filenames: bool,
}

impl YtDlpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.ytdlp.binary.clone(),
            output_dir: config.downloads.output_dir.clone(),
            scratch_root: config.downloads.scratch_root(),
            output_template: config.downloads.output_template.clone(),
            merge_output_format: config.downloads.merge_output_format.clone(),
            restrict_filenames: config.downloads.restrict_filenames,
        }
    }

    fn scratch_dir(&self, job_id: &str) -> PathBuf {
        self.scratch_root.join(job_id)
    }
}

pub struct YtDlpFetcher {
    settings: YtDlpSettings,
}

impl YtDlpFetcher {
    pub fn new(settings: YtDlpSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(YtDlpSettings::from_config(config))
    }

    pub fn settings(&self) -> &YtDlpSettings {
        &self.settings
    }

    /// Command line for one download, without the binary
    pub fn download_args(&self, request: &FetchRequest, scratch: &Path) -> Vec<String> {
        let settings = &self.settings;
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--progress".into(),
            "--no-simulate".into(),
            "--no-playlist".into(),
            "-f".into(),
            request.format_selector.clone(),
            "--merge-output-format".into(),
            settings.merge_output_format.clone(),
            "-P".into(),
            settings.output_dir.display().to_string(),
            "-P".into(),
            format!("temp:{}", scratch.display()),
            "-o".into(),
            settings.output_template.clone(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "--print".into(),
            RESULT_TEMPLATE.into(),
        ];
        if settings.restrict_filenames {
            args.push("--restrict-filenames".into());
        }
        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

impl YtDlpFetcher {
    /// One yt-dlp run; the caller owns the scratch directory.
    fn run(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
        scratch: &Path,
    ) -> Result<JobResult, FetchError> {
        let args = self.download_args(request, scratch);
        debug!(
            job_id = %request.job_id,
            binary = %self.settings.binary,
            ?args,
            "Launching yt-dlp"
        );

        let mut child = Command::new(&self.settings.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FetchError::Spawn {
                binary: self.settings.binary.clone(),
                source,
            })?;

        let stderr_tail = child.stderr.take().map(spawn_stderr_reader);

        let mut reported = None;
        if let Some(stdout) = child.stdout.take() {
            for_each_line(stdout, |line| {
                if let Some(update) = parse_progress_line(line) {
                    progress.report(update);
                } else if let Some(result) = parse_result_line(line) {
                    reported = Some(result);
                } else {
                    trace!(job_id = %request.job_id, line = %line, "yt-dlp stdout");
                }
            });
        }

        let status = child.wait()?;
        let stderr = stderr_tail
            .and_then(|handle| handle.join().ok())
            .map(|lines| Vec::from(lines).join("\n"))
            .unwrap_or_default();

        if !status.success() {
            let message = last_error_line(&stderr)
                .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
            return Err(FetchError::Process {
                message,
                code: status.code(),
                stderr,
            });
        }

        let reported = reported.ok_or(FetchError::MissingResult { stderr })?;
        let filepath = reported
            .filepath
            .map(PathBuf::from)
            .ok_or_else(|| FetchError::Other("yt-dlp did not report a file path".to_string()))?;
        let filepath = filepath.canonicalize().unwrap_or(filepath);

        info!(job_id = %request.job_id, path = %filepath.display(), "yt-dlp finished");
        Ok(JobResult {
            title: non_empty_or_unknown(reported.title),
            id: non_empty_or_unknown(reported.id),
            filepath,
        })
    }
}

impl Fetcher for YtDlpFetcher {
    /// Scratch space is removed whatever the outcome; fragments of a failed
    /// download are never resumed.
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> Result<JobResult, FetchError> {
        if request.url.trim().is_empty() {
            return Err(FetchError::MissingUrl);
        }

        let scratch = self.settings.scratch_dir(&request.job_id);
        std::fs::create_dir_all(&self.settings.output_dir)?;
        std::fs::create_dir_all(&scratch)?;

        let outcome = self.run(request, progress, &scratch);

        match std::fs::remove_dir_all(&scratch) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(job_id = %request.job_id, error = %err, "Scratch directory not removed")
            }
        }

        outcome
    }

    fn probe(&self, url: &str) -> Result<Value, ProbeError> {
        if url.trim().is_empty() {
            return Err(ProbeError::MissingUrl);
        }

        let output = Command::new(&self.settings.binary)
            .args(["-J", "--no-warnings", "--", url])
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                binary: self.settings.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let message = last_error_line(&stderr)
                .unwrap_or_else(|| "failed to extract metadata".to_string());
            warn!(%url, error = %message, "yt-dlp probe failed");
            return Err(ProbeError::Process { message, stderr });
        }

        let info: Value = serde_json::from_slice(&output.stdout)?;
        if info.is_null() {
            return Err(ProbeError::NoMetadata);
        }
        Ok(info)
    }
}

fn spawn_stderr_reader<R: Read + Send + 'static>(stderr: R) -> JoinHandle<VecDeque<String>> {
    std::thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        for_each_line(stderr, |line| {
            trace!(line = %line, "yt-dlp stderr");
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        });
        tail
    })
}

/// Feed every line of `source` to `handle` until EOF.
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the read,
/// so the pipe keeps draining and the child never blocks or dies on it.
fn for_each_line<R: Read>(source: R, mut handle: impl FnMut(&str)) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "Stopped reading yt-dlp output");
                return;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        handle(line.trim_end_matches(['\r', '\n']));
    }
}

fn non_empty_or_unknown(value: Option<String>) -> String {
    value
        .filter(|value| !value.trim().is_empty() && value != "NA")
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Parse a tagged progress line into an update.
///
/// Fields yt-dlp could not fill are printed as `null` or `NA`; both end up
/// as `None`.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let rest = line.trim_start().strip_prefix(PROGRESS_MARKER)?;
    let (json, source_id) = match rest.rsplit_once(SOURCE_ID_MARKER) {
        Some((json, id)) => (json, Some(id.trim())),
        None => (rest, None),
    };

    let value: Value = serde_json::from_str(json.trim()).ok()?;
    let fields = value.as_object()?;

    Some(ProgressUpdate {
        status: fields.get("status").and_then(Value::as_str).map(str::to_string),
        downloaded_bytes: fields.get("downloaded_bytes").and_then(as_byte_count),
        total_bytes: fields.get("total_bytes").and_then(as_byte_count),
        total_bytes_estimate: fields.get("total_bytes_estimate").and_then(as_byte_count),
        progress_pct: None,
        speed: fields.get("speed").and_then(Value::as_f64).filter(|s| s.is_finite()),
        eta: fields.get("eta").and_then(as_byte_count),
        source_id: source_id
            .filter(|id| !id.is_empty() && *id != "NA")
            .map(str::to_string),
        tmpfilename: fields.get("tmpfilename").and_then(Value::as_str).map(PathBuf::from),
        filename: fields.get("filename").and_then(Value::as_str).map(PathBuf::from),
    })
}

fn as_byte_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

#[derive(Debug, Deserialize)]
struct ReportedResult {
    id: Option<String>,
    title: Option<String>,
    filepath: Option<String>,
}

fn parse_result_line(line: &str) -> Option<ReportedResult> {
    let json = line.trim_start().strip_prefix(RESULT_MARKER)?;
    serde_json::from_str(json.trim()).ok()
}
