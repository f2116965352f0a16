//!
//! GraphQL client for the remote ledger query API.
//!
//! This module provides the `LedgerClient` trait used by the synchronization engine and its
//! HTTP implementation. The client performs no retries of its own: every failure is classified
//! and returned to the caller, which owns the retry policy.

use super::types::*;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Queries against the remote ledger.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// The highest block height the ledger currently knows about.
	async fn tip_height(&self) -> Result<u64, LedgerError>;

	/// Blocks within the inclusive window. The ledger may return fewer blocks
	/// than the window holds.
	async fn fetch_blocks(&self, window: Window) -> Result<Vec<Block>, LedgerError>;

	/// Bank send transactions within the inclusive window of block heights.
	async fn fetch_transactions(&self, window: Window) -> Result<Vec<Transaction>, LedgerError>;
}

/// Connection settings for [`GraphqlLedgerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// The GraphQL HTTP endpoint.
	pub endpoint: String,
	/// Transport timeout applied to every request.
	pub request_timeout: Duration,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint: "http://127.0.0.1:8546/graphql/query".to_string(),
			request_timeout: Duration::from_secs(30),
		}
	}
}

/// Ledger client speaking GraphQL over HTTP
#[derive(Clone)]
pub struct GraphqlLedgerClient {
	/// The underlying HTTP client for GraphQL queries.
	http_client: Client,
	/// The GraphQL HTTP endpoint.
	endpoint: String,
}

impl GraphqlLedgerClient {
	/// Create a new ledger client.
	///
	/// # Errors
	/// Returns `LedgerError::Network` if the HTTP client cannot be built.
	pub fn new(config: &ClientConfig) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(config.request_timeout).build()?;

		Ok(Self {
			http_client,
			endpoint: config.endpoint.clone(),
		})
	}

	/// Execute a GraphQL query.
	///
	/// # Returns
	/// The JSON response from the ledger, or a `LedgerError` if the request fails, the response
	/// is not JSON, or the ledger reports errors.
	pub async fn execute_query(&self, query: &str) -> Result<serde_json::Value, LedgerError> {
		let request_body = json!({ "query": query });
		debug!("Sending GraphQL query: {}", request_body);

		let response = self
			.http_client
			.post(&self.endpoint)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		let status = response.status();
		let body = response.text().await?;
		debug!("Response from ledger ({}): {}", status, body);

		if !status.is_success() {
			return Err(LedgerError::Status(status));
		}

		parse_response(&body)
	}
}

/// Parse a GraphQL response body, surfacing reported errors.
fn parse_response(body: &str) -> Result<serde_json::Value, LedgerError> {
	let response_json: serde_json::Value = serde_json::from_str(body)?;

	if let Some(errors) = response_json.get("errors") {
		if !errors.is_null() {
			return Err(LedgerError::Remote(errors.to_string()));
		}
	}

	Ok(response_json)
}

/// Extract and decode `data.<field>` from a GraphQL response.
fn decode_field<T: DeserializeOwned>(
	response: serde_json::Value,
	field: &str,
) -> Result<T, LedgerError> {
	let value = response
		.get("data")
		.and_then(|data| data.get(field))
		.filter(|value| !value.is_null())
		.ok_or_else(|| LedgerError::Decode(format!("missing data.{}", field)))?;

	Ok(T::deserialize(value)?)
}

fn blocks_query(window: Window) -> String {
	format!(
		"{{ blocks(filter: {{ from_height: {}, to_height: {} }}) {{ time height version chain_id proposer_address_raw }} }}",
		window.from, window.to
	)
}

fn transactions_query(window: Window) -> String {
	format!(
		"query {{ transactions(filter: {{ message: {{ type_url: send, route: bank }}, from_block_height: {}, to_block_height: {} }}) {{ index block_height messages {{ value {{ ... on BankMsgSend {{ amount from_address to_address }} }} }} }} }}",
		window.from, window.to
	)
}

#[async_trait]
impl LedgerClient for GraphqlLedgerClient {
	async fn tip_height(&self) -> Result<u64, LedgerError> {
		let response = self.execute_query("query { latestBlockHeight }").await?;
		let height = decode_field(response, "latestBlockHeight")?;
		debug!("Latest block height: {}", height);
		Ok(height)
	}

	async fn fetch_blocks(&self, window: Window) -> Result<Vec<Block>, LedgerError> {
		let response = self.execute_query(&blocks_query(window)).await?;
		decode_field(response, "blocks")
	}

	async fn fetch_transactions(&self, window: Window) -> Result<Vec<Transaction>, LedgerError> {
		let response = self.execute_query(&transactions_query(window)).await?;
		let transactions: Vec<TransactionData> = decode_field(response, "transactions")?;
		debug!("Decoded {} transactions", transactions.len());
		Ok(transactions.into_iter().map(Transaction::from).collect())
	}
}
