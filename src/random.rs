//! Pseudo-random test data
//!
//! A single process-wide PRNG seeded from OS entropy. The seed is logged at
//! debug level on first use so a failing run can be reproduced.

use crate::crypto::{Address, ADDRESS_LENGTH};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};

static PRNG: Lazy<Mutex<StdRng>> = Lazy::new(|| {
    let seed = OsRng.next_u64();
    tracing::debug!(seed, "seeded random generator");
    Mutex::new(StdRng::seed_from_u64(seed))
});

/// Random byte vector of length `n`.
pub fn bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    PRNG.lock().fill_bytes(&mut out);
    out
}

/// Random 32-byte hash.
pub fn hash() -> [u8; 32] {
    let mut out = [0u8; 32];
    PRNG.lock().fill_bytes(&mut out);
    out
}

pub fn address() -> Address {
    Address::from_slice(&bytes(ADDRESS_LENGTH))
}

pub fn uint8() -> u8 {
    PRNG.lock().gen()
}

/// Random element of `slice`, `None` when it is empty.
pub fn element<T>(slice: &[T]) -> Option<&T> {
    if slice.is_empty() {
        return None;
    }
    let idx = PRNG.lock().gen_range(0..slice.len());
    slice.get(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_length() {
        assert_eq!(bytes(0).len(), 0);
        assert_eq!(bytes(77).len(), 77);
    }

    #[test]
    fn test_hashes_differ() {
        assert_ne!(hash(), hash());
        assert_ne!(address(), address());
    }

    #[test]
    fn test_uint8_covers_range() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4096 {
            seen.insert(uint8());
        }
        // 4096 draws over 256 values miss one with negligible probability
        assert!(seen.len() > 200);
    }

    #[test]
    fn test_element() {
        let empty: [u32; 0] = [];
        assert!(element(&empty).is_none());

        let items = [3, 5, 7];
        for _ in 0..32 {
            let picked = element(&items).unwrap();
            assert!(items.contains(picked));
        }
    }
}
