//! Clauses, signed transactions and receipts

pub mod types;
pub mod validation;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::error::LoadError;
    use alloy_primitives::U256;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("ff").unwrap(), U256::from(255u64));
        assert_eq!(parse_amount("0x10").unwrap(), U256::from(16u64));
        assert_eq!(
            parse_amount("de0b6b3a7640000").unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(matches!(parse_amount(""), Err(LoadError::InvalidAmount(_))));
        assert!(matches!(parse_amount("0x"), Err(LoadError::InvalidAmount(_))));
        assert!(matches!(parse_amount("xyz"), Err(LoadError::InvalidAmount(_))));
        // 65 hex digits overflow 256 bits
        let too_big = format!("1{}", "0".repeat(64));
        assert!(matches!(parse_amount(&too_big), Err(LoadError::InvalidAmount(_))));
    }

    #[test]
    fn test_token_transfer_layout() {
        let recipient = crate::random::address();
        let clause = Clause::token_transfer(ENERGY_CONTRACT, recipient, U256::from(1000u64));

        assert_eq!(clause.to, ENERGY_CONTRACT);
        assert_eq!(clause.value, U256::ZERO);
        assert_eq!(clause.data.len(), 68);
        assert_eq!(&clause.data[..4], &TRANSFER_SELECTOR);
        assert_eq!(&clause.data[16..36], recipient.as_slice());
        assert_eq!(
            clause.decode_token_transfer(),
            Some((recipient, U256::from(1000u64)))
        );
    }

    #[test]
    fn test_native_clause_is_not_token_transfer() {
        let clause = Clause::native(crate::random::address(), U256::from(5u64));
        assert!(clause.data.is_empty());
        assert_eq!(clause.decode_token_transfer(), None);
    }

    #[test]
    fn test_transfer_clause_lowering() {
        let recipient = crate::random::address();
        let amount = U256::from(42u64);

        let native = TransferClause::new(recipient, AssetKind::Native, amount).to_clause();
        assert_eq!(native, Clause::native(recipient, amount));

        let token = TransferClause::new(recipient, AssetKind::Token, amount).to_clause();
        assert_eq!(token.decode_token_transfer(), Some((recipient, amount)));
    }

    #[test]
    fn test_signed_tx_validation() {
        let keypair = KeyPair::generate().unwrap();
        let clauses = vec![Clause::native(crate::random::address(), U256::from(1u64))];
        let mut tx = SignedTx::new(keypair.address(), 0, clauses);

        assert!(tx.validate().is_err(), "unsigned tx must be rejected");

        let signature = keypair.sign(&tx.signable_message()).unwrap();
        tx.sign(signature.to_vec(), keypair.public_key_bytes().to_vec());
        assert!(tx.validate().is_ok());

        tx.nonce = 1;
        assert!(tx.validate().is_err(), "tampered tx must be rejected");
    }

    #[test]
    fn test_signer_must_be_origin() {
        let owner = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let clauses = vec![Clause::native(crate::random::address(), U256::from(1u64))];
        let mut tx = SignedTx::new(owner.address(), 0, clauses);

        let signature = other.sign(&tx.signable_message()).unwrap();
        tx.sign(signature.to_vec(), other.public_key_bytes().to_vec());

        let err = tx.validate().unwrap_err();
        assert!(err.to_string().contains("signer does not match origin"));
    }

    #[test]
    fn test_clause_limit() {
        let keypair = KeyPair::generate().unwrap();
        let clauses =
            vec![Clause::native(crate::random::address(), U256::from(1u64)); MAX_CLAUSES_PER_TX + 1];
        let mut tx = SignedTx::new(keypair.address(), 0, clauses);
        let signature = keypair.sign(&tx.signable_message()).unwrap();
        tx.sign(signature.to_vec(), keypair.public_key_bytes().to_vec());

        let err = tx.validate().unwrap_err();
        assert!(err.to_string().contains("max: 100"));
    }
}
