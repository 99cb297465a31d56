use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Name of the per-job scratch area inside the output directory
pub const SCRATCH_DIR_NAME: &str = ".vidqueue-tmp";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub ytdlp: YtDlpConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Upper bound for request bodies
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    /// Allow any origin, method and header (no credentials)
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload_bytes(),
            cors_permissive: true,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize::mib(1)
}

fn default_true() -> bool {
    true
}

/// Where and how media is downloaded
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_format_selector")]
    pub format_selector: String,
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,
    #[serde(default = "default_output_template")]
    pub output_template: String,
    #[serde(default = "default_true")]
    pub restrict_filenames: bool,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format_selector: default_format_selector(),
            merge_output_format: default_merge_output_format(),
            output_template: default_output_template(),
            restrict_filenames: true,
        }
    }
}

impl DownloadsConfig {
    pub fn scratch_root(&self) -> PathBuf {
        self.output_dir.join(SCRATCH_DIR_NAME)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/downloads")
}

fn default_format_selector() -> String {
    "bv*+ba/b".to_string()
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}

fn default_output_template() -> String {
    "%(title)s [%(id)s].%(ext)s".to_string()
}

/// Dispatcher timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_progress_drain_ms")]
    pub progress_drain_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            progress_drain_ms: default_progress_drain_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_progress_drain_ms() -> u64 {
    1000
}

/// Leftover removal after cancellation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    /// Age limit for the fallback sweep when a job's media id is unknown
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,
    #[serde(default = "default_temp_suffixes")]
    pub temp_suffixes: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            recent_window_secs: default_recent_window_secs(),
            temp_suffixes: default_temp_suffixes(),
        }
    }
}

fn default_recent_window_secs() -> u64 {
    60
}

fn default_temp_suffixes() -> Vec<String> {
    [".part", ".ytdl", ".temp", ".tmp"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YtDlpConfig {
    /// Executable name or path
    #[serde(default = "default_ytdlp_binary")]
    pub binary: String,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_ytdlp_binary(),
        }
    }
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.server.max_payload_bytes, ByteSize::mib(1));
        assert!(config.server.cors_permissive);
        assert_eq!(config.downloads.output_dir, PathBuf::from("/downloads"));
        assert_eq!(config.downloads.format_selector, "bv*+ba/b");
        assert_eq!(config.runner.poll_interval_ms, 500);
        assert_eq!(config.cleanup.temp_suffixes.len(), 4);
        assert_eq!(config.ytdlp.binary, "yt-dlp");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[downloads]
output_dir = "/srv/media"

[server]
max_payload_bytes = "256KB"
cors_permissive = false
            "#,
        )
        .unwrap();

        assert_eq!(config.downloads.output_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.downloads.merge_output_format, "mp4");
        assert_eq!(config.server.max_payload_bytes, ByteSize::kib(256));
        assert!(!config.server.cors_permissive);
        assert!(config.downloads.restrict_filenames);
    }

    #[test]
    fn test_scratch_root_lives_under_output() {
        let downloads = DownloadsConfig::default();
        assert_eq!(
            downloads.scratch_root(),
            PathBuf::from("/downloads/.vidqueue-tmp")
        );
    }
}
