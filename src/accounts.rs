//! HD account derivation
//!
//! Accounts are derived from a BIP-39 mnemonic along
//! `m/44'/818'/0'/0/{index}`, the VeChain coin type, so index `i` here is the
//! same account a thor solo node pre-funds at index `i`.

use crate::crypto::{address_to_hex, Address, KeyPair};
use crate::error::{LoadError, Result};
use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use std::str::FromStr;

pub const DERIVATION_PREFIX: &str = "m/44'/818'/0'/0";

/// One derived account. Immutable once derived.
#[derive(Debug, Clone)]
pub struct HdAccount {
    pub index: usize,
    pub address: Address,
    pub keypair: KeyPair,
}

impl HdAccount {
    pub fn address_hex(&self) -> String {
        address_to_hex(&self.address)
    }
}

/// Derive `count` accounts in index order.
pub fn derive_accounts(phrase: &str, count: usize) -> Result<Vec<HdAccount>> {
    let mnemonic = Mnemonic::parse_normalized(phrase)
        .map_err(|e| LoadError::Derivation(format!("invalid mnemonic: {}", e)))?;
    let seed = mnemonic.to_seed("");

    (0..count).map(|index| derive_one(&seed, index)).collect()
}

fn derive_one(seed: &[u8], index: usize) -> Result<HdAccount> {
    let path = DerivationPath::from_str(&format!("{}/{}", DERIVATION_PREFIX, index))
        .map_err(|e| LoadError::Derivation(format!("bad path for index {}: {}", index, e)))?;
    let xprv = XPrv::derive_from_path(seed, &path)
        .map_err(|e| LoadError::Derivation(format!("index {}: {}", index, e)))?;

    let keypair = KeyPair::from_secret_bytes(&xprv.to_bytes())?;
    Ok(HdAccount {
        index,
        address: keypair.address(),
        keypair,
    })
}
