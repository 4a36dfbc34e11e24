//! Metric catalog, samples and sinks
//!
//! Samples are pushed in connected groups (one `Vec<Sample>` per event). A
//! sink never blocks its caller: [`ChannelSink`] drops the group when the
//! queue is full or the consumer is gone, and counts what it dropped.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter,
    Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Default,
    /// Milliseconds.
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricType,
    pub unit: ValueType,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const REQUEST_DURATION: Metric = Metric {
    name: "vechain_req_duration",
    kind: MetricType::Trend,
    unit: ValueType::Time,
};

pub const TIME_TO_MINE: Metric = Metric {
    name: "vechain_time_to_mine",
    kind: MetricType::Trend,
    unit: ValueType::Time,
};

pub const BLOCK: Metric = Metric {
    name: "vechain_block",
    kind: MetricType::Counter,
    unit: ValueType::Default,
};

pub const GAS_USED: Metric = Metric {
    name: "vechain_gas_used",
    kind: MetricType::Trend,
    unit: ValueType::Default,
};

pub const TPS: Metric = Metric {
    name: "vechain_tps",
    kind: MetricType::Trend,
    unit: ValueType::Default,
};

pub const BLOCK_TIME: Metric = Metric {
    name: "vechain_block_time",
    kind: MetricType::Trend,
    unit: ValueType::Time,
};

pub const CATALOG: [Metric; 6] = [REQUEST_DURATION, TIME_TO_MINE, BLOCK, GAS_USED, TPS, BLOCK_TIME];

/// Ordered tag name -> value map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn root() -> Self {
        TagSet::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in tags {
            self.0.insert(k.into(), v.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Metric,
    pub tags: TagSet,
    pub value: f64,
    /// Wall-clock observation time, not block time.
    pub time: DateTime<Utc>,
}

impl Sample {
    pub fn now(metric: Metric, tags: TagSet, value: f64) -> Self {
        Sample {
            metric,
            tags,
            value,
            time: Utc::now(),
        }
    }
}

/// Best-effort destination for sample groups.
pub trait MetricSink: Send + Sync {
    /// Must not block. A sink that cannot take the group drops it.
    fn push(&self, samples: Vec<Sample>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricSink for NoopSink {
    fn push(&self, _samples: Vec<Sample>) {}
}

/// Bounded queue in front of a consumer task.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<Sample>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// `capacity` is counted in sample groups.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<Sample>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = ChannelSink {
            tx,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (sink, rx)
    }

    /// Samples accepted into the queue.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Samples dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MetricSink for ChannelSink {
    fn push(&self, samples: Vec<Sample>) {
        let count = samples.len() as u64;
        match self.tx.try_send(samples) {
            Ok(()) => {
                self.delivered.fetch_add(count, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(count, Ordering::Relaxed);
                debug!(count, "metric sink full, dropping samples");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(count, Ordering::Relaxed);
            }
        }
    }
}

/// Keeps every pushed group in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    groups: parking_lot::Mutex<Vec<Vec<Sample>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> Vec<Vec<Sample>> {
        self.groups.lock().clone()
    }

    pub fn samples_of(&self, metric: Metric) -> Vec<Sample> {
        self.groups
            .lock()
            .iter()
            .flatten()
            .filter(|s| s.metric == metric)
            .cloned()
            .collect()
    }
}

impl MetricSink for CollectingSink {
    fn push(&self, samples: Vec<Sample>) {
        self.groups.lock().push(samples);
    }
}

/// Report how long one RPC call took, tagged with the call name.
pub fn record_request_duration(sink: &dyn MetricSink, root: &TagSet, call: &str, elapsed: Duration) {
    sink.push(vec![Sample::now(
        REQUEST_DURATION,
        root.clone().with("call", call),
        elapsed.as_millis() as f64,
    )]);
}
