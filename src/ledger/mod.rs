//! Remote ledger integration module
//!
//! This module provides the client and types for querying the remote ledger's GraphQL API
//! for its tip height, blocks, and bank send transactions by height range.

/// GraphQL client for the remote ledger
mod client;
/// Type definitions for ledger records
mod types;

#[cfg(test)]
pub use client::MockLedgerClient;
pub use client::{ClientConfig, GraphqlLedgerClient, LedgerClient};
pub use types::*;
