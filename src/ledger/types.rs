//! Types for the remote ledger query API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive range of block heights processed as one fetch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
	/// First height in the window.
	pub from: u64,
	/// Last height in the window (inclusive).
	pub to: u64,
}

impl Window {
	/// Create the window of `size` heights starting at `from`.
	///
	/// A zero size is treated as one so the window is never empty.
	pub fn starting_at(from: u64, size: u64) -> Self {
		Self {
			from,
			to: from.saturating_add(size.max(1) - 1),
		}
	}

	/// Number of heights covered by the window.
	pub fn size(&self) -> u64 {
		self.to - self.from + 1
	}

	pub fn contains(&self, height: u64) -> bool {
		(self.from..=self.to).contains(&height)
	}
}

impl fmt::Display for Window {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}, {}]", self.from, self.to)
	}
}

/// A block as returned by the ledger.
///
/// Blocks are identified by height and never change once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	/// The block height.
	pub height: u64,
	/// The time the block was produced.
	pub time: DateTime<Utc>,
	/// The node software version that produced the block.
	pub version: String,
	/// The chain identifier.
	pub chain_id: String,
	/// Opaque identifier of the block proposer.
	pub proposer_address_raw: String,
}

/// A single value transfer carried by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
	/// Decimal amount with denomination, kept opaque.
	pub amount: String,
	pub from_address: String,
	pub to_address: String,
}

/// A transaction, identified by `(block_height, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Height of the block containing the transaction.
	pub block_height: u64,
	/// Position of the transaction within its block.
	pub index: u32,
	/// Transfers in message order. May be empty.
	pub transfers: Vec<Transfer>,
}

impl Transaction {
	pub fn key(&self) -> (u64, u32) {
		(self.block_height, self.index)
	}
}

/// Transaction data as returned by the ledger's transaction query.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionData {
	pub index: u32,
	pub block_height: u64,
	#[serde(default)]
	pub messages: Vec<MessageData>,
}

/// A message inside a transaction. Messages of other types come back with an
/// empty or partial `value`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageData {
	#[serde(default)]
	pub value: Option<SendValue>,
}

/// The fields of a bank send message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendValue {
	#[serde(default)]
	pub amount: Option<String>,
	#[serde(default)]
	pub from_address: Option<String>,
	#[serde(default)]
	pub to_address: Option<String>,
}

impl SendValue {
	fn into_transfer(self) -> Option<Transfer> {
		Some(Transfer {
			amount: self.amount?,
			from_address: self.from_address?,
			to_address: self.to_address?,
		})
	}
}

impl From<TransactionData> for Transaction {
	fn from(data: TransactionData) -> Self {
		let transfers = data
			.messages
			.into_iter()
			.filter_map(|message| message.value.and_then(SendValue::into_transfer))
			.collect();

		Self {
			block_height: data.block_height,
			index: data.index,
			transfers,
		}
	}
}

/// Error types for ledger queries
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("HTTP error: {0}")]
	Network(#[from] reqwest::Error),

	#[error("HTTP status: {0}")]
	Status(reqwest::StatusCode),

	#[error("Malformed response: {0}")]
	Decode(String),

	#[error("Ledger reported errors: {0}")]
	Remote(String),
}

impl LedgerError {
	/// Whether the failure points at an unexpected response shape rather than
	/// a transport or application failure.
	pub fn is_decode(&self) -> bool {
		matches!(self, LedgerError::Decode(_))
	}
}

impl From<serde_json::Error> for LedgerError {
	fn from(e: serde_json::Error) -> Self {
		LedgerError::Decode(e.to_string())
	}
}
