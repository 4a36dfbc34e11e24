//! Funding distributor
//!
//! Fans native-coin and token balances out from the first `start` accounts
//! (the funders) to every account at or above `start` (the recipients).
//!
//! - recipient `i` is funded by account `i % start`
//! - each recipient gets one native clause and one token clause, in that order
//! - a funder's clauses go out in batches of at most `batch_size`; batch
//!   `j + 1` is only sent once batch `j` is included
//! - funders run in parallel, each in its own task
//!
//! Funding is not atomic. A failing funder stops at its first failed batch;
//! batches already confirmed (by it or by anyone else) stay on chain. The
//! error returned carries every funder's outcome so callers can see exactly
//! how far each got.

use crate::chain::AccountManager;
use crate::crypto::Address;
use crate::error::{LoadError, Result};
use crate::metrics::{MetricSink, Sample, TagSet, TIME_TO_MINE};
use crate::transaction::{AssetKind, Clause, TransferClause, MAX_CLAUSES_PER_TX};
use alloy_primitives::U256;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = MAX_CLAUSES_PER_TX;

/// Funder index -> clauses it sends, in recipient order.
pub type FunderAssignment = BTreeMap<usize, Vec<TransferClause>>;

/// Check `0 < start <= accounts`.
pub fn validate_start(start: usize, accounts: usize) -> Result<()> {
    if start == 0 || start > accounts {
        return Err(LoadError::InvalidStartIndex { start, accounts });
    }
    Ok(())
}

/// Assign every recipient index in `[start, N)` to funder `i % start`.
///
/// Funders with no recipients are absent from the map.
pub fn assign_funders(addresses: &[Address], start: usize, amount: U256) -> Result<FunderAssignment> {
    validate_start(start, addresses.len())?;

    let mut assignment = FunderAssignment::new();
    for (i, recipient) in addresses.iter().enumerate().skip(start) {
        let funder = i % start;
        assignment.entry(funder).or_default().extend([
            TransferClause::new(*recipient, AssetKind::Native, amount),
            TransferClause::new(*recipient, AssetKind::Token, amount),
        ]);
    }
    Ok(assignment)
}

/// Consecutive slices of at most `batch_size` items, in order.
pub fn partition_batches<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    items.chunks(batch_size.max(1)).collect()
}

/// How far one funder got.
#[derive(Debug, Clone)]
pub struct FunderOutcome {
    pub funder: usize,
    pub address: Address,
    pub batches_total: usize,
    pub batches_confirmed: usize,
    pub clauses_confirmed: usize,
    pub error: Option<LoadError>,
}

impl FunderOutcome {
    fn new(funder: usize, address: Address, batches_total: usize) -> Self {
        FunderOutcome {
            funder,
            address,
            batches_total,
            batches_confirmed: 0,
            clauses_confirmed: 0,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.batches_confirmed == self.batches_total
    }
}

/// Per-funder outcomes, ordered by funder index.
#[derive(Debug, Clone, Default)]
pub struct FundingReport {
    pub outcomes: Vec<FunderOutcome>,
}

impl FundingReport {
    pub fn outcome(&self, funder: usize) -> Option<&FunderOutcome> {
        self.outcomes.iter().find(|o| o.funder == funder)
    }

    pub fn batches_confirmed(&self) -> usize {
        self.outcomes.iter().map(|o| o.batches_confirmed).sum()
    }

    pub fn clauses_confirmed(&self) -> usize {
        self.outcomes.iter().map(|o| o.clauses_confirmed).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &FunderOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

/// At least one funder failed. Carries the full report.
#[derive(Debug, Clone)]
pub struct FundingFailure {
    pub report: FundingReport,
}

impl FundingFailure {
    /// The failure of the lowest-indexed failing funder.
    pub fn first(&self) -> Option<&LoadError> {
        self.report.failed().next().and_then(|o| o.error.as_ref())
    }

    pub fn errors(&self) -> Vec<&LoadError> {
        self.report.failed().filter_map(|o| o.error.as_ref()).collect()
    }
}

impl fmt::Display for FundingFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let failed = self.report.failed().count();
        match self.first() {
            Some(first) => write!(
                f,
                "{} ({} of {} funders failed, {} batches confirmed)",
                first,
                failed,
                self.report.outcomes.len(),
                self.report.batches_confirmed()
            ),
            None => write!(f, "no funder failed"),
        }
    }
}

pub struct FundingDistributor {
    batch_size: usize,
    sink: Option<Arc<dyn MetricSink>>,
    root_tags: TagSet,
}

impl FundingDistributor {
    pub fn new(batch_size: usize) -> Self {
        FundingDistributor {
            batch_size: batch_size.clamp(1, MAX_CLAUSES_PER_TX),
            sink: None,
            root_tags: TagSet::root(),
        }
    }

    /// Report send-to-inclusion latency of every batch as `vechain_time_to_mine`.
    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>, root_tags: TagSet) -> Self {
        self.sink = Some(sink);
        self.root_tags = root_tags;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fund accounts `[start, N)` from accounts `[0, start)`, `amount` of each asset per recipient.
    pub async fn fund(
        &self,
        accounts: &[Arc<dyn AccountManager>],
        start: usize,
        amount: U256,
    ) -> Result<FundingReport> {
        validate_start(start, accounts.len())?;

        let addresses: Vec<Address> = accounts.iter().map(|a| a.address()).collect();
        let assignment = assign_funders(&addresses, start, amount)?;
        info!(
            accounts = accounts.len(),
            start,
            funders = assignment.len(),
            %amount,
            "funding accounts"
        );

        let mut workers = Vec::with_capacity(assignment.len());
        for (funder, clauses) in assignment {
            let worker = FunderWorker {
                funder,
                manager: Arc::clone(&accounts[funder]),
                clauses,
                batch_size: self.batch_size,
                sink: self.sink.clone(),
                root_tags: self.root_tags.clone(),
            };
            let address = addresses[funder];
            let batches = worker.clauses.len().div_ceil(self.batch_size);
            workers.push((funder, address, batches, tokio::spawn(worker.run())));
        }

        let mut report = FundingReport::default();
        for (funder, address, batches, handle) in workers {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut outcome = FunderOutcome::new(funder, address, batches);
                    outcome.error = Some(LoadError::Submission {
                        funder,
                        reason: format!("worker aborted: {}", e),
                    });
                    outcome
                }
            };
            report.outcomes.push(outcome);
        }

        if report.failed().next().is_some() {
            let failure = FundingFailure { report };
            warn!(%failure, "funding incomplete");
            return Err(LoadError::Funding(failure));
        }

        info!(
            batches = report.batches_confirmed(),
            clauses = report.clauses_confirmed(),
            "funding complete"
        );
        Ok(report)
    }
}

impl Default for FundingDistributor {
    fn default() -> Self {
        FundingDistributor::new(DEFAULT_BATCH_SIZE)
    }
}

struct FunderWorker {
    funder: usize,
    manager: Arc<dyn AccountManager>,
    clauses: Vec<TransferClause>,
    batch_size: usize,
    sink: Option<Arc<dyn MetricSink>>,
    root_tags: TagSet,
}

impl FunderWorker {
    async fn run(self) -> FunderOutcome {
        let batches = partition_batches(&self.clauses, self.batch_size);
        let mut outcome = FunderOutcome::new(self.funder, self.manager.address(), batches.len());

        for (index, batch) in batches.into_iter().enumerate() {
            match self.submit_and_confirm(index, batch).await {
                Ok(()) => {
                    outcome.batches_confirmed += 1;
                    outcome.clauses_confirmed += batch.len();
                }
                Err(e) => {
                    warn!(funder = self.funder, batch = index, error = %e, "funder stopped");
                    outcome.error = Some(e);
                    break;
                }
            }
        }
        outcome
    }

    async fn submit_and_confirm(&self, index: usize, batch: &[TransferClause]) -> Result<()> {
        let clauses: Vec<Clause> = batch.iter().map(TransferClause::to_clause).collect();
        let started = Instant::now();

        let tx = self
            .manager
            .send(&clauses)
            .await
            .map_err(|e| e.for_funder(self.funder))?;
        debug!(funder = self.funder, batch = index, tx = %tx, clauses = clauses.len(), "batch sent");

        let receipt = self
            .manager
            .wait(&tx)
            .await
            .map_err(|e| e.for_funder(self.funder))?;
        if receipt.reverted {
            return Err(LoadError::Confirmation {
                funder: self.funder,
                reason: format!("transaction {} reverted in block {}", tx, receipt.block_number),
            });
        }

        let elapsed = started.elapsed();
        if let Some(sink) = &self.sink {
            sink.push(vec![Sample::now(
                TIME_TO_MINE,
                self.root_tags.clone().with("funder", self.funder.to_string()),
                elapsed.as_millis() as f64,
            )]);
        }
        info!(
            funder = self.funder,
            batch = index,
            tx = %tx,
            block = receipt.block_number,
            "batch confirmed"
        );
        Ok(())
    }
}
