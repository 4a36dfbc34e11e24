//! thorload - load-generation client for VeChain Thor networks
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Load Generation
//! - [`funding`] - Fans balances out from funder accounts to recipients
//! - [`poller`] - Watches the chain head and reports block metrics
//! - [`dedup`] - At-most-once reporting per (endpoint, block)
//! - [`session`] - Shared registry, sink and shutdown for a set of clients
//! - [`client`] - Per-script client: accounts, funding, polling
//!
//! ## Chain Access
//! - [`chain`] - Reader / account-manager traits and the in-memory backend
//! - [`transaction`] - Clauses, signed transactions and receipts
//!
//! ## Cryptography & Accounts
//! - [`crypto`] - Keys, addresses and signatures (secp256k1)
//! - [`accounts`] - HD accounts (BIP-39/BIP-32)
//!
//! ## Metrics
//! - [`metrics`] - Metric catalog, samples and sinks
//!
//! ## Configuration & Utilities
//! - [`config`] - Client options and the TOML config file
//! - [`error`] - Error types
//! - [`random`] - Random test data

#![forbid(unsafe_code)]

// ============================================================================
// Load Generation
// ============================================================================
pub mod client;
pub mod dedup;
pub mod funding;
pub mod poller;
pub mod session;

// ============================================================================
// Chain Access
// ============================================================================
pub mod chain;
pub mod transaction;

// ============================================================================
// Cryptography & Accounts
// ============================================================================
pub mod accounts;
pub mod crypto;

// ============================================================================
// Metrics
// ============================================================================
pub mod metrics;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod random;
