//! Deduplicated block poller
//!
//! One poller per client watches the head of its endpoint. Every time the
//! head advances it computes block metrics and, if no other poller sharing
//! the [`DedupRegistry`] has already done so for that `(endpoint, block)`,
//! pushes one connected group of four samples.
//!
//! The loop is `Init -> Polling -> Stopped`. It stops when its cancellation
//! token fires, or right away if the very first head read fails. Read
//! failures while polling only skip the tick.

use crate::chain::{BlockHead, ChainReader};
use crate::dedup::{DedupKey, DedupRegistry, EndpointLease};
use crate::metrics::{MetricSink, Sample, TagSet, BLOCK, BLOCK_TIME, GAS_USED, TPS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Init,
    Polling,
    Stopped,
}

/// Result of feeding one head read to the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Head did not advance past the stored block.
    Unchanged,
    /// Head advanced but another poller already reported this block.
    Duplicate,
    /// Head advanced and the sample group was pushed.
    Emitted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    pub unchanged: u64,
    pub duplicates: u64,
    pub emitted: u64,
    pub read_failures: u64,
    pub initial_read_failed: bool,
}

/// Derived figures for one head transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockMetrics {
    pub elapsed_secs: u64,
    /// Transactions per second. Infinite (or NaN) when `elapsed_secs` is zero.
    pub tps: f64,
    pub block_time_ms: f64,
}

impl BlockMetrics {
    /// Elapsed time as human text, e.g. `10s` or `1m 5s`.
    pub fn elapsed_text(&self) -> String {
        humantime::format_duration(Duration::from_secs(self.elapsed_secs)).to_string()
    }
}

pub fn block_metrics(previous: &BlockHead, new: &BlockHead) -> BlockMetrics {
    let elapsed_secs = new.timestamp.saturating_sub(previous.timestamp);
    BlockMetrics {
        elapsed_secs,
        tps: new.tx_count as f64 / elapsed_secs as f64,
        block_time_ms: (elapsed_secs * 1000) as f64,
    }
}

pub struct BlockPoller {
    endpoint: String,
    reader: Arc<dyn ChainReader>,
    registry: Arc<DedupRegistry>,
    sink: Arc<dyn MetricSink>,
    root_tags: TagSet,
    interval: Duration,
    state: watch::Sender<PollerState>,
    _lease: EndpointLease,
    previous: Option<BlockHead>,
    stats: PollerStats,
}

impl BlockPoller {
    pub fn new(
        endpoint: impl Into<String>,
        reader: Arc<dyn ChainReader>,
        registry: Arc<DedupRegistry>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let endpoint = endpoint.into();
        let lease = registry.register(endpoint.clone());
        BlockPoller {
            endpoint,
            reader,
            registry,
            sink,
            root_tags: TagSet::root(),
            interval: DEFAULT_POLL_INTERVAL,
            state: watch::Sender::new(PollerState::Init),
            _lease: lease,
            previous: None,
            stats: PollerStats::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Tags added to every sample this poller pushes.
    pub fn with_root_tags(mut self, root_tags: TagSet) -> Self {
        self.root_tags = root_tags;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Follows the state after the poller has been moved into `run`.
    pub fn watch_state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    pub fn previous(&self) -> Option<&BlockHead> {
        self.previous.as_ref()
    }

    /// Feed one head read. The first head ever observed only seeds the
    /// stored block.
    pub fn observe(&mut self, head: BlockHead) -> TickOutcome {
        let previous = match self.previous {
            Some(previous) if head.number > previous.number => previous,
            Some(_) => {
                self.stats.unchanged += 1;
                return TickOutcome::Unchanged;
            }
            None => {
                self.previous = Some(head);
                self.stats.unchanged += 1;
                return TickOutcome::Unchanged;
            }
        };

        let computed = block_metrics(&previous, &head);
        self.previous = Some(head);

        if !self.registry.check_and_insert(&DedupKey::new(self.endpoint.clone(), head.number)) {
            debug!(endpoint = %self.endpoint, block = head.number, "block already reported");
            self.stats.duplicates += 1;
            return TickOutcome::Duplicate;
        }

        self.sink.push(self.block_samples(&head, &computed));
        debug!(
            endpoint = %self.endpoint,
            block = head.number,
            txs = head.tx_count,
            tps = computed.tps,
            "block reported"
        );
        self.stats.emitted += 1;
        TickOutcome::Emitted
    }

    fn block_samples(&self, head: &BlockHead, computed: &BlockMetrics) -> Vec<Sample> {
        vec![
            Sample::now(
                BLOCK,
                self.root_tags.clone().with_tags([
                    ("transactions", head.tx_count.to_string()),
                    ("gas_used", head.gas_used.to_string()),
                    ("gas_limit", head.gas_limit.to_string()),
                ]),
                head.number as f64,
            ),
            Sample::now(
                GAS_USED,
                self.root_tags.clone().with("block", head.number.to_string()),
                head.gas_used as f64,
            ),
            Sample::now(TPS, self.root_tags.clone(), computed.tps),
            Sample::now(
                BLOCK_TIME,
                self.root_tags
                    .clone()
                    .with("block_timestamp_diff", computed.elapsed_text()),
                computed.block_time_ms,
            ),
        ]
    }

    /// Poll until `cancel` fires. Returns the tick counters.
    pub async fn run(mut self, cancel: CancellationToken) -> PollerStats {
        let reader = Arc::clone(&self.reader);
        let initial = tokio::select! {
            _ = cancel.cancelled() => None,
            read = reader.best_block() => Some(read),
        };

        match initial {
            Some(Ok(head)) => self.previous = Some(head),
            None => {
                self.state.send_replace(PollerState::Stopped);
                return self.stats;
            }
            Some(Err(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "initial head read failed, poller not started");
                self.stats.initial_read_failed = true;
                self.state.send_replace(PollerState::Stopped);
                return self.stats;
            }
        }

        self.state.send_replace(PollerState::Polling);
        info!(endpoint = %self.endpoint, interval = ?self.interval, "poller started");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.best_block() => read,
            };

            self.stats.ticks += 1;
            match read {
                Ok(head) => {
                    self.observe(head);
                }
                Err(e) => {
                    self.stats.read_failures += 1;
                    debug!(endpoint = %self.endpoint, error = %e, "head read failed, skipping tick");
                }
            }
        }

        self.state.send_replace(PollerState::Stopped);
        info!(
            endpoint = %self.endpoint,
            ticks = self.stats.ticks,
            emitted = self.stats.emitted,
            "poller stopped"
        );
        self.stats
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<PollerStats> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryChain;
    use crate::metrics::CollectingSink;

    fn head(number: u64, timestamp: u64, tx_count: usize) -> BlockHead {
        BlockHead {
            number,
            timestamp,
            gas_used: 21_000 * tx_count as u64,
            gas_limit: 40_000_000,
            tx_count,
        }
    }

    fn poller(registry: &Arc<DedupRegistry>, sink: &Arc<CollectingSink>) -> BlockPoller {
        let chain = Arc::new(InMemoryChain::new("mem://poller"));
        BlockPoller::new(
            "mem://poller",
            chain as Arc<dyn ChainReader>,
            Arc::clone(registry),
            Arc::clone(sink) as Arc<dyn MetricSink>,
        )
    }

    #[test]
    fn test_tps_from_timestamp_diff() {
        let computed = block_metrics(&head(1, 100, 5), &head(2, 105, 20));
        assert_eq!(computed.elapsed_secs, 5);
        assert_eq!(computed.tps, 4.0);
        assert_eq!(computed.block_time_ms, 5000.0);
        assert_eq!(computed.elapsed_text(), "5s");
    }

    #[test]
    fn test_zero_elapsed_is_not_special_cased() {
        assert!(block_metrics(&head(1, 100, 0), &head(2, 100, 3)).tps.is_infinite());
        assert!(block_metrics(&head(1, 100, 0), &head(2, 100, 0)).tps.is_nan());
    }

    #[test]
    fn test_backwards_timestamp_saturates_to_zero() {
        let computed = block_metrics(&head(1, 100, 0), &head(2, 95, 6));
        assert_eq!(computed.elapsed_secs, 0);
        assert!(computed.tps.is_infinite());
        assert_eq!(computed.block_time_ms, 0.0);
        assert_eq!(computed.elapsed_text(), "0s");
    }

    #[test]
    fn test_elapsed_text_over_a_minute() {
        let computed = block_metrics(&head(1, 100, 0), &head(2, 165, 13));
        assert_eq!(computed.elapsed_text(), "1m 5s");
        assert_eq!(computed.tps, 0.2);
    }

    #[test]
    fn test_observe_emits_four_samples() {
        let registry = Arc::new(DedupRegistry::default());
        let sink = Arc::new(CollectingSink::new());
        let mut poller = poller(&registry, &sink);

        assert_eq!(poller.observe(head(7, 100, 0)), TickOutcome::Unchanged);
        assert_eq!(poller.observe(head(8, 110, 30)), TickOutcome::Emitted);

        let groups = sink.groups();
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.len(), 4);

        assert_eq!(group[0].metric, BLOCK);
        assert_eq!(group[0].value, 8.0);
        assert_eq!(group[0].tags.get("transactions"), Some("30"));
        assert_eq!(group[0].tags.get("gas_used"), Some("630000"));
        assert_eq!(group[0].tags.get("gas_limit"), Some("40000000"));

        assert_eq!(group[1].metric, GAS_USED);
        assert_eq!(group[1].tags.get("block"), Some("8"));

        assert_eq!(group[2].metric, TPS);
        assert_eq!(group[2].value, 3.0);
        assert!(group[2].tags.is_empty());

        assert_eq!(group[3].metric, BLOCK_TIME);
        assert_eq!(group[3].value, 10_000.0);
        assert_eq!(group[3].tags.get("block_timestamp_diff"), Some("10s"));
    }

    #[test]
    fn test_unchanged_head_emits_nothing() {
        let registry = Arc::new(DedupRegistry::default());
        let sink = Arc::new(CollectingSink::new());
        let mut poller = poller(&registry, &sink);

        poller.observe(head(1, 100, 0));
        assert_eq!(poller.observe(head(2, 110, 1)), TickOutcome::Emitted);
        assert_eq!(poller.observe(head(2, 110, 1)), TickOutcome::Unchanged);
        assert_eq!(poller.observe(head(1, 100, 0)), TickOutcome::Unchanged);

        assert_eq!(sink.groups().len(), 1);
        assert_eq!(poller.previous().map(|h| h.number), Some(2));
        assert_eq!(poller.stats().unchanged, 3);
    }

    #[test]
    fn test_shared_registry_reports_block_once() {
        let registry = Arc::new(DedupRegistry::default());
        let sink = Arc::new(CollectingSink::new());
        let mut first = poller(&registry, &sink);
        let mut second = poller(&registry, &sink);

        first.observe(head(1, 100, 0));
        second.observe(head(1, 100, 0));

        assert_eq!(first.observe(head(2, 110, 4)), TickOutcome::Emitted);
        assert_eq!(second.observe(head(2, 110, 4)), TickOutcome::Duplicate);
        // the duplicate still advances the stored block
        assert_eq!(second.previous().map(|h| h.number), Some(2));
        assert_eq!(sink.samples_of(BLOCK).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_new_blocks() {
        let chain = Arc::new(InMemoryChain::new("mem://run"));
        let sink = Arc::new(CollectingSink::new());
        let cancel = CancellationToken::new();
        let registry = Arc::new(DedupRegistry::default());

        let poller = BlockPoller::new(
            "mem://run",
            Arc::clone(&chain) as Arc<dyn ChainReader>,
            Arc::clone(&registry),
            Arc::clone(&sink) as Arc<dyn MetricSink>,
        );
        let state = poller.watch_state();
        assert_eq!(*state.borrow(), PollerState::Init);
        assert_eq!(registry.leases("mem://run"), 1);
        let handle = poller.spawn(cancel.clone());

        // let the initial read happen before the first block
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*state.borrow(), PollerState::Polling);
        chain.produce_block();
        tokio::time::sleep(Duration::from_millis(500)).await;
        chain.produce_block();
        tokio::time::sleep(Duration::from_millis(500)).await;
        // nothing new for three ticks
        tokio::time::sleep(Duration::from_millis(1000)).await;

        cancel.cancel();
        let stats = handle.await.unwrap();

        let blocks: Vec<f64> = sink.samples_of(BLOCK).iter().map(|s| s.value).collect();
        assert_eq!(blocks, vec![1.0, 2.0]);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.unchanged, 3);
        assert!(!stats.initial_read_failed);
        assert_eq!(*state.borrow(), PollerState::Stopped);
        assert_eq!(registry.leases("mem://run"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_read_failure_stops_poller() {
        let chain = Arc::new(InMemoryChain::new("mem://down"));
        chain.set_fail_reads(true);

        let poller = BlockPoller::new(
            "mem://down",
            chain as Arc<dyn ChainReader>,
            Arc::new(DedupRegistry::default()),
            Arc::new(CollectingSink::new()) as Arc<dyn MetricSink>,
        );
        let state = poller.watch_state();
        let stats = poller.run(CancellationToken::new()).await;

        assert!(stats.initial_read_failed);
        assert_eq!(stats.ticks, 0);
        assert_eq!(*state.borrow(), PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failures_skip_ticks() {
        let chain = Arc::new(InMemoryChain::new("mem://flaky"));
        let sink = Arc::new(CollectingSink::new());
        let cancel = CancellationToken::new();

        let handle = BlockPoller::new(
            "mem://flaky",
            Arc::clone(&chain) as Arc<dyn ChainReader>,
            Arc::new(DedupRegistry::default()),
            Arc::clone(&sink) as Arc<dyn MetricSink>,
        )
        .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        chain.set_fail_reads(true);
        chain.produce_block();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        chain.set_fail_reads(false);
        tokio::time::sleep(Duration::from_millis(500)).await;

        cancel.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.read_failures, 2);
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.samples_of(BLOCK).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_poller() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let chain = Arc::new(InMemoryChain::new("mem://idle"));
            let cancel = CancellationToken::new();
            let handle = BlockPoller::new(
                "mem://idle",
                chain as Arc<dyn ChainReader>,
                Arc::new(DedupRegistry::default()),
                Arc::new(CollectingSink::new()) as Arc<dyn MetricSink>,
            )
            .with_interval(Duration::from_secs(3600))
            .spawn(cancel.clone());

            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
            let stats = handle.await.unwrap();
            assert_eq!(stats.ticks, 0);
        })
        .await
        .expect("test_cancel_stops_idle_poller timed out");
    }
}
