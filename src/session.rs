//! Observation session
//!
//! A session owns what its clients share: the dedup registry, the metric
//! sink and the cancellation token every poller listens on. Ending the
//! session stops and joins all of its pollers.

use crate::chain::ChainReader;
use crate::config::Config;
use crate::dedup::DedupRegistry;
use crate::metrics::MetricSink;
use crate::poller::{BlockPoller, PollerStats, DEFAULT_POLL_INTERVAL};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub dedup_window: usize,
    pub max_endpoints: usize,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        SessionConfig {
            poll_interval: config.poller.interval(),
            dedup_window: config.dedup.window,
            max_endpoints: config.dedup.max_endpoints,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            dedup_window: 256,
            max_endpoints: 64,
        }
    }
}

/// Stats of one finished poller.
#[derive(Debug, Clone)]
pub struct PollerReport {
    pub endpoint: String,
    pub stats: PollerStats,
}

pub struct Session {
    config: SessionConfig,
    cancel: CancellationToken,
    registry: Arc<DedupRegistry>,
    sink: Arc<dyn MetricSink>,
    pollers: Mutex<Vec<(String, JoinHandle<PollerStats>)>>,
}

impl Session {
    pub fn new(config: SessionConfig, sink: Arc<dyn MetricSink>) -> Self {
        let registry = Arc::new(DedupRegistry::new(config.dedup_window, config.max_endpoints));
        Session {
            config,
            cancel: CancellationToken::new(),
            registry,
            sink,
            pollers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<DedupRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn sink(&self) -> Arc<dyn MetricSink> {
        Arc::clone(&self.sink)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn a poller for `endpoint`. Must be called inside a tokio runtime.
    pub fn start_poller(&self, endpoint: impl Into<String>, reader: Arc<dyn ChainReader>) {
        let endpoint = endpoint.into();
        if self.is_closed() {
            warn!(endpoint = %endpoint, "session closed, poller not started");
            return;
        }

        let handle = BlockPoller::new(endpoint.clone(), reader, self.registry(), self.sink())
            .with_interval(self.config.poll_interval)
            .spawn(self.cancel.child_token());
        self.pollers.lock().push((endpoint, handle));
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.lock().len()
    }

    /// Cancel every poller and wait for all of them to finish.
    pub async fn shutdown(&self) -> Vec<PollerReport> {
        self.cancel.cancel();
        let pollers = std::mem::take(&mut *self.pollers.lock());
        info!(pollers = pollers.len(), "session shutting down");

        let mut reports = Vec::with_capacity(pollers.len());
        for (endpoint, handle) in pollers {
            match handle.await {
                Ok(stats) => reports.push(PollerReport { endpoint, stats }),
                Err(e) => warn!(endpoint = %endpoint, error = %e, "poller task failed"),
            }
        }
        reports
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
