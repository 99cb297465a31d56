use std::sync::Arc;

use super::proxy::{ProxyConfig, ProxyError, StreamProxy};
use crate::config::Config;
use crate::fetch::{Fetcher, YtDlpFetcher};
use crate::observability::Metrics;
use crate::queue::{JobBroker, JobStore};
use crate::worker::WorkerConfig;
use crate::worker::cleanup::{Cleanup, FsCleanup};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: Arc<JobBroker>,
    pub fetcher: Arc<dyn Fetcher>,
    pub proxy: StreamProxy,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire a fresh job store, broker and stream client around the given
    /// collaborators.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        cleanup: Arc<dyn Cleanup>,
    ) -> Result<Self, ProxyError> {
        let metrics = Arc::new(Metrics::new());
        let broker = JobBroker::new(
            Arc::new(JobStore::new()),
            Arc::clone(&fetcher),
            cleanup,
            Arc::clone(&metrics),
            WorkerConfig::from_config(&config),
        );
        let proxy = StreamProxy::new(&ProxyConfig::default())?;

        Ok(Self {
            config: Arc::new(config),
            broker: Arc::new(broker),
            fetcher,
            proxy,
            metrics,
        })
    }

    /// Production wiring: yt-dlp for fetching, filesystem cleanup
    pub fn from_config(config: Config) -> Result<Self, ProxyError> {
        let fetcher = Arc::new(YtDlpFetcher::from_config(&config));
        let cleanup = Arc::new(FsCleanup::from_config(&config));
        Self::new(config, fetcher, cleanup)
    }
}
