//! Stateless transaction checks

use crate::error::LoadError;
use crate::transaction::types::{SignedTx, MAX_CLAUSES_PER_TX};

impl SignedTx {
    /// Stateless checks: clause count and signature against the embedded key.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.clauses.is_empty() {
            return Err(LoadError::Submission {
                funder: 0,
                reason: "transaction has no clauses".to_string(),
            });
        }
        if self.clauses.len() > MAX_CLAUSES_PER_TX {
            return Err(LoadError::Submission {
                funder: 0,
                reason: format!(
                    "transaction has {} clauses (max: {})",
                    self.clauses.len(),
                    MAX_CLAUSES_PER_TX
                ),
            });
        }

        let (signature, public_key) = match (&self.signature, &self.public_key) {
            (Some(sig), Some(pk)) => (sig, pk),
            _ => {
                return Err(LoadError::Submission {
                    funder: 0,
                    reason: "transaction not signed".to_string(),
                })
            }
        };

        if crate::crypto::signer_address(public_key)? != self.origin {
            return Err(LoadError::Submission {
                funder: 0,
                reason: format!("signer does not match origin {}", self.origin),
            });
        }
        crate::crypto::verify_signature(public_key, &self.signable_message(), signature)
    }
}
