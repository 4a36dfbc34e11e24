//! Error types for thorload

use crate::funding::FundingFailure;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Invalid start index {start} for {accounts} accounts (expected 0 < start <= accounts)")]
    InvalidStartIndex { start: usize, accounts: usize },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Cryptographic error: {0}")]
    Crypto(String),
    #[error("Key derivation error: {0}")]
    Derivation(String),
    #[error("Funder {funder} failed to submit transaction: {reason}")]
    Submission { funder: usize, reason: String },
    #[error("Funder {funder} transaction was not confirmed: {reason}")]
    Confirmation { funder: usize, reason: String },
    #[error("Chain read failed: {0}")]
    ChainRead(String),
    #[error("Funding failed: {0}")]
    Funding(FundingFailure),
    #[error("IO error: {0}")]
    Io(String),
}

impl LoadError {
    /// Rebinds a submission or confirmation error to the funder that hit it.
    /// Collaborators don't know funder indices, so they report `funder: 0`.
    pub fn for_funder(self, index: usize) -> Self {
        match self {
            LoadError::Submission { reason, .. } => LoadError::Submission {
                funder: index,
                reason,
            },
            LoadError::Confirmation { reason, .. } => LoadError::Confirmation {
                funder: index,
                reason,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        LoadError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for LoadError {
    fn from(err: toml::de::Error) -> Self {
        LoadError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::InvalidOptions(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LoadError>;
