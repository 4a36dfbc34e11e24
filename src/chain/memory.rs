//! In-memory chain backend
//!
//! Keeps balances, a pending pool and sealed blocks behind one mutex. Blocks
//! are sealed explicitly with [`InMemoryChain::produce_block`] or by a
//! background producer; confirmation waits park on a `watch` channel carrying
//! the head number.

use super::{AccountManager, BlockHead, ChainBackend, ChainReader};
use crate::accounts::HdAccount;
use crate::crypto::Address;
use crate::error::{LoadError, Result};
use crate::transaction::{Clause, Receipt, SignedTx, TxId, ENERGY_CONTRACT};
use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timestamp of the mainnet genesis block.
pub const GENESIS_TIMESTAMP: u64 = 1_530_316_800;
pub const DEFAULT_BLOCK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_GAS_LIMIT: u64 = 40_000_000;

const TX_BASE_GAS: u64 = 5_000;
const CLAUSE_GAS: u64 = 16_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub native: U256,
    pub token: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub submitted: u64,
    pub included: u64,
    pub reverted: u64,
    /// Submissions made while the same origin still had a transaction pending.
    pub submitted_while_pending: u64,
}

/// A transaction as sealed into a block.
#[derive(Debug, Clone)]
pub struct IncludedTx {
    pub id: TxId,
    pub block_number: u64,
    pub tx: SignedTx,
    pub reverted: bool,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<BlockHead>,
    pending: Vec<(TxId, SignedTx)>,
    receipts: HashMap<TxId, Receipt>,
    included: Vec<IncludedTx>,
    balances: HashMap<Address, Balance>,
    nonces: HashMap<Address, u64>,
    pending_by_origin: HashMap<Address, usize>,
    failing_senders: HashSet<Address>,
    reverting_senders: HashSet<Address>,
    stats: ChainStats,
}

pub struct InMemoryChain {
    endpoint: String,
    state: Mutex<ChainState>,
    head: watch::Sender<u64>,
    fail_reads: AtomicBool,
    block_interval_secs: u64,
}

impl InMemoryChain {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_block_interval(endpoint, DEFAULT_BLOCK_INTERVAL_SECS)
    }

    /// `block_interval_secs` is the timestamp step between sealed blocks.
    pub fn with_block_interval(endpoint: impl Into<String>, block_interval_secs: u64) -> Self {
        let genesis = BlockHead {
            number: 0,
            timestamp: GENESIS_TIMESTAMP,
            gas_used: 0,
            gas_limit: DEFAULT_GAS_LIMIT,
            tx_count: 0,
        };
        let state = ChainState {
            blocks: vec![genesis],
            ..Default::default()
        };
        let (head, _) = watch::channel(0);
        InMemoryChain {
            endpoint: endpoint.into(),
            state: Mutex::new(state),
            head,
            fail_reads: AtomicBool::new(false),
            block_interval_secs,
        }
    }

    pub fn credit(&self, address: Address, native: U256, token: U256) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(address).or_default();
        balance.native += native;
        balance.token += token;
    }

    pub fn balance_of(&self, address: &Address) -> Balance {
        self.state
            .lock()
            .balances
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub fn head(&self) -> BlockHead {
        let state = self.state.lock();
        state.blocks.last().copied().unwrap_or_default()
    }

    pub fn stats(&self) -> ChainStats {
        self.state.lock().stats.clone()
    }

    pub fn next_nonce(&self, address: &Address) -> u64 {
        self.state.lock().nonces.get(address).copied().unwrap_or(0)
    }

    /// Every sealed transaction sent by `origin`, in inclusion order.
    pub fn transactions_from(&self, origin: &Address) -> Vec<IncludedTx> {
        self.state
            .lock()
            .included
            .iter()
            .filter(|inc| inc.tx.origin == *origin)
            .cloned()
            .collect()
    }

    /// Reject every future submission from `origin`.
    pub fn fail_sends_from(&self, origin: Address) {
        self.state.lock().failing_senders.insert(origin);
    }

    /// Seal every future transaction from `origin` as reverted.
    pub fn revert_txs_from(&self, origin: Address) {
        self.state.lock().reverting_senders.insert(origin);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Validate and queue a signed transaction.
    pub fn submit(&self, tx: SignedTx) -> Result<TxId> {
        tx.validate()?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.failing_senders.contains(&tx.origin) {
            return Err(LoadError::Submission {
                funder: 0,
                reason: format!("submission from {} rejected", tx.origin),
            });
        }

        let expected = state.nonces.get(&tx.origin).copied().unwrap_or(0);
        if tx.nonce != expected {
            return Err(LoadError::Submission {
                funder: 0,
                reason: format!("nonce {} does not match expected {}", tx.nonce, expected),
            });
        }

        let pending_for_origin = state.pending_by_origin.entry(tx.origin).or_insert(0);
        if *pending_for_origin > 0 {
            state.stats.submitted_while_pending += 1;
        }
        *pending_for_origin += 1;
        state.nonces.insert(tx.origin, expected + 1);
        state.stats.submitted += 1;

        let id = TxId(crate::random::hash());
        debug!(tx = %id, origin = %tx.origin, clauses = tx.clauses.len(), "queued transaction");
        state.pending.push((id, tx));
        Ok(id)
    }

    /// Seal all pending transactions into a new block and advance the head.
    pub fn produce_block(&self) -> BlockHead {
        let block = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let parent = state.blocks.last().copied().unwrap_or_default();
            let number = parent.number + 1;
            let pending = std::mem::take(&mut state.pending);

            let mut gas_used = 0u64;
            for (id, tx) in &pending {
                let reverted =
                    state.reverting_senders.contains(&tx.origin) || !apply_clauses(&mut state.balances, tx);
                gas_used += TX_BASE_GAS + CLAUSE_GAS * tx.clauses.len() as u64;

                if let Some(count) = state.pending_by_origin.get_mut(&tx.origin) {
                    *count = count.saturating_sub(1);
                }
                state.stats.included += 1;
                if reverted {
                    state.stats.reverted += 1;
                }
                state.receipts.insert(
                    *id,
                    Receipt {
                        tx_id: *id,
                        block_number: number,
                        reverted,
                    },
                );
                state.included.push(IncludedTx {
                    id: *id,
                    block_number: number,
                    tx: tx.clone(),
                    reverted,
                });
            }

            let block = BlockHead {
                number,
                timestamp: parent.timestamp + self.block_interval_secs,
                gas_used,
                gas_limit: DEFAULT_GAS_LIMIT,
                tx_count: pending.len(),
            };
            state.blocks.push(block);
            block
        };

        self.head.send_replace(block.number);
        block
    }

    /// Seal a block every `every` until `cancel` fires.
    pub fn spawn_producer(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let chain = Arc::clone(self);
        tokio::spawn(async move {
            info!(endpoint = %chain.endpoint, ?every, "block producer started");
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        chain.produce_block();
                    }
                }
            }
            info!(endpoint = %chain.endpoint, "block producer stopped");
        })
    }

    /// Wait until `id` has a receipt.
    pub async fn wait_for(&self, id: &TxId) -> Result<Receipt> {
        let mut head = self.head.subscribe();
        loop {
            {
                let state = self.state.lock();
                if let Some(receipt) = state.receipts.get(id) {
                    return Ok(receipt.clone());
                }
                if !state.pending.iter().any(|(pending_id, _)| pending_id == id) {
                    return Err(LoadError::Confirmation {
                        funder: 0,
                        reason: format!("unknown transaction {}", id),
                    });
                }
            }
            head.changed().await.map_err(|_| LoadError::Confirmation {
                funder: 0,
                reason: "chain closed".to_string(),
            })?;
        }
    }
}

/// Apply value and token transfers atomically. Returns false (no change) on insufficient balance.
fn apply_clauses(balances: &mut HashMap<Address, Balance>, tx: &SignedTx) -> bool {
    let mut native_out = U256::ZERO;
    let mut token_out = U256::ZERO;
    let mut credits: Vec<(Address, U256, U256)> = Vec::with_capacity(tx.clauses.len());

    for clause in &tx.clauses {
        native_out = native_out.saturating_add(clause.value);
        if clause.to == ENERGY_CONTRACT {
            if let Some((recipient, amount)) = clause.decode_token_transfer() {
                token_out = token_out.saturating_add(amount);
                credits.push((recipient, U256::ZERO, amount));
            }
        }
        if !clause.value.is_zero() {
            credits.push((clause.to, clause.value, U256::ZERO));
        }
    }

    let origin = balances.get(&tx.origin).copied().unwrap_or_default();
    if origin.native < native_out || origin.token < token_out {
        return false;
    }

    if let Some(balance) = balances.get_mut(&tx.origin) {
        balance.native -= native_out;
        balance.token -= token_out;
    }
    for (to, native, token) in credits {
        let balance = balances.entry(to).or_default();
        balance.native += native;
        balance.token += token;
    }
    true
}

#[async_trait]
impl ChainReader for InMemoryChain {
    async fn best_block(&self) -> Result<BlockHead> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LoadError::ChainRead(format!("{} unavailable", self.endpoint)));
        }
        Ok(self.head())
    }
}

/// Signs with a derived key and submits to an [`InMemoryChain`].
pub struct MemoryAccount {
    chain: Arc<InMemoryChain>,
    account: HdAccount,
}

impl MemoryAccount {
    pub fn new(chain: Arc<InMemoryChain>, account: HdAccount) -> Self {
        MemoryAccount { chain, account }
    }
}

#[async_trait]
impl AccountManager for MemoryAccount {
    fn address(&self) -> Address {
        self.account.address
    }

    async fn send(&self, clauses: &[Clause]) -> Result<TxId> {
        let nonce = self.chain.next_nonce(&self.account.address);
        let mut tx = SignedTx::new(self.account.address, nonce, clauses.to_vec());
        let signature = self.account.keypair.sign(&tx.signable_message())?;
        tx.sign(
            signature.to_vec(),
            self.account.keypair.public_key_bytes().to_vec(),
        );
        self.chain.submit(tx)
    }

    async fn wait(&self, tx: &TxId) -> Result<Receipt> {
        self.chain.wait_for(tx).await
    }
}

impl ChainBackend for Arc<InMemoryChain> {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn reader(&self) -> Arc<dyn ChainReader> {
        Arc::clone(self) as Arc<dyn ChainReader>
    }

    fn manager(&self, account: &HdAccount) -> Arc<dyn AccountManager> {
        Arc::new(MemoryAccount::new(Arc::clone(self), account.clone()))
    }
}
