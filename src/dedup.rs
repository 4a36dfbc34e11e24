//! Block deduplication across concurrent pollers
//!
//! Every poller watching the same endpoint shares one [`DedupRegistry`]; the
//! first poller to claim `(endpoint, block)` emits, everyone else skips.
//!
//! Memory is bounded on both axes:
//! - per endpoint only the `window` most recent block numbers are kept, and
//!   anything at or below the highest evicted number counts as claimed
//! - an endpoint's window lives as long as some poller holds an
//!   [`EndpointLease`] on it; once the last lease drops the window is retired
//!   into an LRU of `max_endpoints`, the only place windows are ever evicted
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Identity of one emission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub endpoint: String,
    pub block: u64,
}

impl DedupKey {
    pub fn new(endpoint: impl Into<String>, block: u64) -> Self {
        DedupKey {
            endpoint: endpoint.into(),
            block,
        }
    }
}

impl fmt::Display for DedupKey {
    /// Endpoint immediately followed by the decimal block number.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.endpoint, self.block)
    }
}

#[derive(Debug, Default)]
struct EndpointWindow {
    seen: BTreeSet<u64>,
    /// Highest block number evicted from `seen`.
    floor: Option<u64>,
    leases: usize,
}

impl EndpointWindow {
    fn claim(&mut self, block: u64, window: usize) -> bool {
        if self.floor.is_some_and(|floor| block <= floor) {
            return false;
        }
        if !self.seen.insert(block) {
            return false;
        }
        while self.seen.len() > window {
            if let Some(evicted) = self.seen.pop_first() {
                self.floor = Some(self.floor.map_or(evicted, |f| f.max(evicted)));
            }
        }
        true
    }

    fn contains(&self, block: u64) -> bool {
        self.floor.is_some_and(|floor| block <= floor) || self.seen.contains(&block)
    }
}

struct Endpoints {
    /// Never evicted. Leased windows, plus windows claimed without a lease.
    live: HashMap<String, EndpointWindow>,
    /// Windows whose last lease was dropped, most recent first.
    retired: LruCache<String, EndpointWindow>,
}

impl Endpoints {
    fn get(&self, endpoint: &str) -> Option<&EndpointWindow> {
        self.live.get(endpoint).or_else(|| self.retired.peek(endpoint))
    }
}

pub struct DedupRegistry {
    window: usize,
    endpoints: Mutex<Endpoints>,
}

impl DedupRegistry {
    /// Zero for either bound is treated as one.
    pub fn new(window: usize, max_endpoints: usize) -> Self {
        let capacity = NonZeroUsize::new(max_endpoints).unwrap_or(NonZeroUsize::MIN);
        DedupRegistry {
            window: window.max(1),
            endpoints: Mutex::new(Endpoints {
                live: HashMap::new(),
                retired: LruCache::new(capacity),
            }),
        }
    }

    /// Pin `endpoint`'s window for as long as the returned lease is alive.
    /// A retired window is brought back, so its floor still holds.
    pub fn register(self: &Arc<Self>, endpoint: impl Into<String>) -> EndpointLease {
        let endpoint = endpoint.into();
        let mut guard = self.endpoints.lock();
        let endpoints = &mut *guard;
        match endpoints.live.get_mut(&endpoint) {
            Some(window) => window.leases += 1,
            None => {
                let mut window = endpoints.retired.pop(&endpoint).unwrap_or_default();
                window.leases = 1;
                endpoints.live.insert(endpoint.clone(), window);
            }
        }
        EndpointLease {
            registry: Arc::clone(self),
            endpoint,
        }
    }

    fn release(&self, endpoint: &str) {
        let mut guard = self.endpoints.lock();
        let endpoints = &mut *guard;
        let last = match endpoints.live.get_mut(endpoint) {
            Some(window) => {
                window.leases = window.leases.saturating_sub(1);
                window.leases == 0
            }
            None => false,
        };
        if last {
            if let Some(window) = endpoints.live.remove(endpoint) {
                endpoints.retired.put(endpoint.to_string(), window);
            }
        }
    }

    /// Atomically claim `key`. Returns true for exactly one caller per key
    /// while the key is inside its endpoint's window.
    pub fn check_and_insert(&self, key: &DedupKey) -> bool {
        let mut guard = self.endpoints.lock();
        let endpoints = &mut *guard;
        if let Some(window) = endpoints.live.get_mut(&key.endpoint) {
            return window.claim(key.block, self.window);
        }
        if let Some(window) = endpoints.retired.get_mut(&key.endpoint) {
            return window.claim(key.block, self.window);
        }
        let mut window = EndpointWindow::default();
        let claimed = window.claim(key.block, self.window);
        endpoints.live.insert(key.endpoint.clone(), window);
        claimed
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.endpoints
            .lock()
            .get(&key.endpoint)
            .is_some_and(|window| window.contains(key.block))
    }

    /// Block numbers currently held for `endpoint`.
    pub fn tracked(&self, endpoint: &str) -> usize {
        self.endpoints
            .lock()
            .get(endpoint)
            .map_or(0, |window| window.seen.len())
    }

    /// Live leases on `endpoint`.
    pub fn leases(&self, endpoint: &str) -> usize {
        self.endpoints
            .lock()
            .live
            .get(endpoint)
            .map_or(0, |window| window.leases)
    }

    pub fn endpoint_count(&self) -> usize {
        let endpoints = self.endpoints.lock();
        endpoints.live.len() + endpoints.retired.len()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Default for DedupRegistry {
    fn default() -> Self {
        DedupRegistry::new(256, 64)
    }
}

/// Keeps one endpoint's window from being evicted. Dropping the last lease
/// for an endpoint retires its window.
pub struct EndpointLease {
    registry: Arc<DedupRegistry>,
    endpoint: String,
}

impl EndpointLease {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for EndpointLease {
    fn drop(&mut self) {
        self.registry.release(&self.endpoint);
    }
}

impl fmt::Debug for EndpointLease {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EndpointLease").field("endpoint", &self.endpoint).finish()
    }
}
