/// Transaction types for thorload
use crate::crypto::Address;
use crate::error::LoadError;
use alloy_primitives::{address, U256};
use std::fmt;

/// Maximum clauses a single transaction carries.
pub const MAX_CLAUSES_PER_TX: usize = 100;

/// Built-in energy (VTHO) token contract.
pub const ENERGY_CONTRACT: Address = address!("0000000000000000000000000000456E65726779");

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Asset moved by a transfer clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AssetKind {
    /// Native coin, carried as the clause value.
    Native,
    /// Fungible energy token, carried as a `transfer` call.
    Token,
}

/// One atomic call inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

impl Clause {
    pub fn native(to: Address, amount: U256) -> Self {
        Clause {
            to,
            value: amount,
            data: Vec::new(),
        }
    }

    /// ABI-encoded `transfer(recipient, amount)` call on `token`.
    pub fn token_transfer(token: Address, recipient: Address, amount: U256) -> Self {
        let mut data = Vec::with_capacity(4 + 32 + 32);
        data.extend_from_slice(&TRANSFER_SELECTOR);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_slice());
        data.extend_from_slice(&amount.to_be_bytes::<32>());
        Clause {
            to: token,
            value: U256::ZERO,
            data,
        }
    }

    /// Inverse of [`Clause::token_transfer`]. `None` when `data` is not a transfer call.
    pub fn decode_token_transfer(&self) -> Option<(Address, U256)> {
        if self.data.len() != 68 || self.data[..4] != TRANSFER_SELECTOR {
            return None;
        }
        // high bytes of the address word must be zero
        if self.data[4..16].iter().any(|b| *b != 0) {
            return None;
        }
        let recipient = Address::from_slice(&self.data[16..36]);
        let amount = U256::from_be_slice(&self.data[36..68]);
        Some((recipient, amount))
    }
}

/// What the funding distributor plans: send `amount` of `asset` to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferClause {
    pub recipient: Address,
    pub asset: AssetKind,
    pub amount: U256,
}

impl TransferClause {
    pub fn new(recipient: Address, asset: AssetKind, amount: U256) -> Self {
        TransferClause {
            recipient,
            asset,
            amount,
        }
    }

    pub fn to_clause(&self) -> Clause {
        match self.asset {
            AssetKind::Native => Clause::native(self.recipient, self.amount),
            AssetKind::Token => Clause::token_transfer(ENERGY_CONTRACT, self.recipient, self.amount),
        }
    }
}

/// Parse a base-16 amount of base units, with or without `0x`.
pub fn parse_amount(hex_amount: &str) -> Result<U256, LoadError> {
    let digits = hex_amount.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Err(LoadError::InvalidAmount("amount is empty".to_string()));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| LoadError::InvalidAmount(format!("{:?} is not a 256-bit hex amount: {}", hex_amount, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Inclusion result for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_id: TxId,
    pub block_number: u64,
    pub reverted: bool,
}

/// A signed batch of clauses from one origin account.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub origin: Address,
    pub nonce: u64,
    pub clauses: Vec<Clause>,
    pub signature: Option<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
}

impl SignedTx {
    pub fn new(origin: Address, nonce: u64, clauses: Vec<Clause>) -> Self {
        SignedTx {
            origin,
            nonce,
            clauses,
            signature: None,
            public_key: None,
        }
    }

    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice(b"CLAUSES:");
        message.extend_from_slice(self.origin.as_slice());
        message.extend_from_slice(&self.nonce.to_le_bytes());
        for clause in &self.clauses {
            message.extend_from_slice(clause.to.as_slice());
            message.extend_from_slice(&clause.value.to_be_bytes::<32>());
            message.extend_from_slice(&(clause.data.len() as u32).to_le_bytes());
            message.extend_from_slice(&clause.data);
        }
        message
    }

    pub fn sign(&mut self, signature: Vec<u8>, public_key: Vec<u8>) {
        self.signature = Some(signature);
        self.public_key = Some(public_key);
    }
}
