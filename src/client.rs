//! Load-test client
//!
//! What a test script holds: the derived accounts of one mnemonic, an account
//! manager for each, and a block poller registered with the session.

use crate::accounts::{derive_accounts, HdAccount};
use crate::chain::{AccountManager, BlockHead, ChainBackend, ChainReader};
use crate::config::{ClientOptions, FundingConfig};
use crate::error::Result;
use crate::funding::{FundingDistributor, FundingReport};
use crate::metrics::{record_request_duration, MetricSink, TagSet};
use crate::session::Session;
use crate::transaction::parse_amount;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Reports the latency of every head read as `vechain_req_duration`.
pub struct InstrumentedReader {
    inner: Arc<dyn ChainReader>,
    sink: Arc<dyn MetricSink>,
    root_tags: TagSet,
}

impl InstrumentedReader {
    pub fn new(inner: Arc<dyn ChainReader>, sink: Arc<dyn MetricSink>) -> Self {
        InstrumentedReader {
            inner,
            sink,
            root_tags: TagSet::root(),
        }
    }
}

#[async_trait]
impl ChainReader for InstrumentedReader {
    async fn best_block(&self) -> Result<BlockHead> {
        let started = Instant::now();
        let head = self.inner.best_block().await;
        record_request_duration(self.sink.as_ref(), &self.root_tags, "best_block", started.elapsed());
        head
    }
}

pub struct Client {
    options: ClientOptions,
    endpoint: String,
    accounts: Vec<HdAccount>,
    managers: Vec<Arc<dyn AccountManager>>,
    distributor: FundingDistributor,
}

impl Client {
    /// Derive accounts, bind them to `backend` and start this client's poller.
    pub fn connect(
        options: ClientOptions,
        backend: &dyn ChainBackend,
        session: &Session,
        funding: &FundingConfig,
    ) -> Result<Self> {
        let options = options.with_defaults();
        let accounts = derive_accounts(&options.mnemonic, options.accounts)?;
        let managers = accounts.iter().map(|a| backend.manager(a)).collect();
        let endpoint = backend.endpoint();

        let reader = InstrumentedReader::new(backend.reader(), session.sink());
        session.start_poller(endpoint.clone(), Arc::new(reader));

        info!(endpoint = %endpoint, accounts = accounts.len(), "client connected");
        Ok(Client {
            options,
            endpoint,
            accounts,
            managers,
            distributor: FundingDistributor::new(funding.batch_size).with_sink(session.sink(), TagSet::root()),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Checksummed addresses in derivation order.
    pub fn accounts(&self) -> Vec<String> {
        self.accounts.iter().map(HdAccount::address_hex).collect()
    }

    pub fn hd_accounts(&self) -> &[HdAccount] {
        &self.accounts
    }

    /// Fund accounts `[start, N)` from `[0, start)` with `amount_hex` base units of each asset.
    pub async fn fund(&self, start: usize, amount_hex: &str) -> Result<FundingReport> {
        let amount = parse_amount(amount_hex)?;
        self.distributor.fund(&self.managers, start, amount).await
    }
}
