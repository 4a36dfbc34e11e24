//! Cryptographic primitives for thorload

use crate::error::LoadError;
use alloy_primitives::keccak256;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};

pub use alloy_primitives::Address;

pub const ADDRESS_LENGTH: usize = 20;

static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Convert an address to its checksummed hex form.
pub fn address_to_hex(addr: &Address) -> String {
    addr.to_checksum(None)
}

/// Parse a hex address, with or without the `0x` prefix.
pub fn address_from_hex(hex_str: &str) -> Result<Address, LoadError> {
    let trimmed = hex_str.trim_start_matches("0x");
    let bytes = hex::decode(trimmed)
        .map_err(|e| LoadError::Crypto(format!("Invalid hex address: {}", e)))?;
    if bytes.len() != ADDRESS_LENGTH {
        return Err(LoadError::Crypto(format!(
            "Address must be {} bytes, got {}",
            ADDRESS_LENGTH,
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Result<Self, LoadError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// 32-byte big-endian scalar, as produced by BIP-32 derivation.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(LoadError::Crypto(format!(
                "expected a {}-byte secret scalar, got {} bytes",
                SECRET_KEY_SIZE,
                bytes.len()
            )));
        }
        SecretKey::from_slice(bytes)
            .map(Self::from_secret_key)
            .map_err(|e| LoadError::Crypto(format!("secret scalar out of range: {}", e)))
    }

    /// Account address: last 20 bytes of keccak-256 over the uncompressed
    /// public key without its 0x04 prefix.
    pub fn address(&self) -> Address {
        address_of(&self.public_key)
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    /// Signs the keccak-256 digest of `message` and returns the compact signature.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], LoadError> {
        let digest = keccak_message(message)?;
        Ok(SECP256K1_CONTEXT
            .sign_ecdsa(&digest, &self.secret_key)
            .serialize_compact())
    }
}

fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    Address::from_slice(&keccak256(&uncompressed[1..]).as_slice()[12..])
}

/// Address of a compressed public key.
pub fn signer_address(public_key: &[u8]) -> Result<Address, LoadError> {
    PublicKey::from_slice(public_key)
        .map(|pk| address_of(&pk))
        .map_err(|e| LoadError::Crypto(format!("bad public key: {}", e)))
}

fn keccak_message(message: &[u8]) -> Result<Message, LoadError> {
    Message::from_digest_slice(keccak256(message).as_slice())
        .map_err(|e| LoadError::Crypto(format!("bad digest: {}", e)))
}

/// Check a compact signature over the keccak-256 digest of `message`.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), LoadError> {
    if public_key.len() != PUBLIC_KEY_SIZE || signature.len() != COMPACT_SIGNATURE_SIZE {
        return Err(LoadError::Crypto(format!(
            "malformed signer data: {}-byte key, {}-byte signature",
            public_key.len(),
            signature.len()
        )));
    }

    let signer = PublicKey::from_slice(public_key)
        .map_err(|e| LoadError::Crypto(format!("bad public key: {}", e)))?;
    let signature = Signature::from_compact(signature)
        .map_err(|e| LoadError::Crypto(format!("bad signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&keccak_message(message)?, &signature, &signer)
        .map_err(|_| LoadError::Crypto("signature does not match signer".to_string()))
}
