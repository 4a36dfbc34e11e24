//! Chain collaborators
//!
//! The funding distributor and the block poller only talk to the chain
//! through these traits. Transport, signing format and key custody live
//! behind them; [`memory::InMemoryChain`] is the in-process backend used by
//! the simulator and the tests.

pub mod memory;

use crate::accounts::HdAccount;
use crate::crypto::Address;
use crate::error::Result;
use crate::transaction::{Clause, Receipt, TxId};
use async_trait::async_trait;
use std::sync::Arc;

/// Head-of-chain snapshot as seen by a poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHead {
    pub number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: usize,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current best (head) block.
    async fn best_block(&self) -> Result<BlockHead>;
}

/// Signing and submission on behalf of one account.
#[async_trait]
pub trait AccountManager: Send + Sync {
    fn address(&self) -> Address;

    /// Sign `clauses` as one transaction and broadcast it.
    async fn send(&self, clauses: &[Clause]) -> Result<TxId>;

    /// Block until `tx` is included. A reverted receipt is returned as-is;
    /// callers decide whether that counts as failure.
    async fn wait(&self, tx: &TxId) -> Result<Receipt>;
}

/// One connection to one endpoint, able to hand out readers and per-account managers.
pub trait ChainBackend: Send + Sync {
    /// Identity of the endpoint; pollers sharing it share dedup keys.
    fn endpoint(&self) -> String;

    fn reader(&self) -> Arc<dyn ChainReader>;

    fn manager(&self, account: &HdAccount) -> Arc<dyn AccountManager>;
}
