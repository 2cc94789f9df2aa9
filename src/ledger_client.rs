//! Ledger Client Module
//!
//! This module defines the boundary between the engine and the distributed
//! ledger: a typed operation descriptor, the finality protocol, and a
//! client trait the engine consumes. The engine never embeds ledger query
//! language; descriptors are serialized by the adapter behind the trait.
//!
//! ## Protocol
//!
//! - `submit` hands a signed operation to the ledger and returns an
//!   operation id immediately; submission itself can fail (network or
//!   signing) before anything reaches the ledger.
//! - `await_finality` resolves the operation id to Sealed or Failed, or
//!   reports `TimedOut` when the bound elapses first. A timed-out
//!   operation is NOT cancelled ledger-side.
//! - `query_escrows` reads current escrow records for the store to cache.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::store::{Address, Escrow, EscrowFilter, EscrowId, RefundMode, TokenKind};

// ============================================================================
// OPERATION TYPES
// ============================================================================

/// Identifier of a submitted ledger operation.
pub type OperationId = String;

/// Typed description of a mutating ledger operation.
///
/// The adapter serializes this into whatever transaction body the ledger
/// expects; the engine only ever constructs and inspects the typed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationDescriptor {
    /// Withdraw `amount` from the sender into an escrow vault and register
    /// the record. Atomic ledger-side: on failure nothing is withdrawn.
    CreateEscrow {
        sender: Address,
        receiver: Address,
        amount: Decimal,
        token: TokenKind,
        expiry: u64,
        refund_mode: RefundMode,
    },
    /// Transition an active escrow to Claimed and pay out the receiver.
    ClaimEscrow { id: EscrowId, requester: Address },
    /// Transition an expired escrow to Refunded and return funds to the
    /// sender.
    RefundEscrow { id: EscrowId, requester: Address },
}

/// Finality report for a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalityStatus {
    /// The operation is permanently applied.
    Sealed,
    /// The ledger rejected the operation; the reason is classified by the
    /// transaction runner.
    Failed(String),
    /// Finality was not observed within the requested bound.
    TimedOut,
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// Boundary trait for ledger access.
///
/// Implementations must be safe to share across tasks; the engine holds a
/// single `Arc<dyn LedgerClient>` used concurrently by the store, the
/// transaction runner, and the scheduler.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submits an operation, returning its id on acceptance.
    ///
    /// # Returns
    ///
    /// * `Ok(OperationId)` - The ledger accepted the operation for processing
    /// * `Err(EngineError::SubmissionFailed)` - The operation never reached
    ///   the ledger and may be retried
    async fn submit(&self, op: &OperationDescriptor) -> EngineResult<OperationId>;

    /// Awaits finality of a submitted operation, bounded by `timeout`.
    async fn await_finality(
        &self,
        operation_id: &str,
        timeout: Duration,
    ) -> EngineResult<FinalityStatus>;

    /// Queries current escrow records matching `filter`.
    async fn query_escrows(&self, filter: &EscrowFilter) -> EngineResult<Vec<Escrow>>;
}

// ============================================================================
// HTTP ACCESS NODE CLIENT
// ============================================================================

/// Response returned by the access node when an operation is submitted.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    operation_id: String,
}

/// Status of an operation as reported by the access node.
#[derive(Debug, Deserialize)]
struct OperationStatusResponse {
    /// "pending", "sealed", or "failed"
    status: String,
    /// Failure reason, present when status is "failed"
    reason: Option<String>,
}

/// Client for communicating with a ledger access node via its REST API.
pub struct HttpLedgerClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the access node (e.g., "http://127.0.0.1:8888")
    base_url: String,
    /// Interval between finality polls
    poll_interval: Duration,
}

impl HttpLedgerClient {
    /// Creates a new access node client from the service configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration with the access node URL and
    ///   request timeouts
    ///
    /// # Returns
    ///
    /// * `Ok(HttpLedgerClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Invalid URL or failed to create client
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.ledger.base_url)
            .context("Invalid access node base URL")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.ledger.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.engine.finality_poll_ms),
        })
    }

    /// Fetches the current status of an operation.
    async fn operation_status(&self, operation_id: &str) -> EngineResult<OperationStatusResponse> {
        let endpoint = format!("{}/v1/operations/{}", self.base_url, operation_id);

        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| EngineError::Unknown(format!("status request failed: {e}")))?
            .error_for_status()
            .map_err(|e| EngineError::Unknown(format!("status request rejected: {e}")))?;

        response
            .json::<OperationStatusResponse>()
            .await
            .map_err(|e| EngineError::Unknown(format!("malformed status response: {e}")))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, op: &OperationDescriptor) -> EngineResult<OperationId> {
        let endpoint = format!("{}/v1/operations", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .json(op)
            .send()
            .await
            .map_err(|e| EngineError::SubmissionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::SubmissionFailed(format!(
                "access node returned {}",
                response.status()
            )));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| EngineError::SubmissionFailed(format!("malformed submit response: {e}")))?;

        Ok(submitted.operation_id)
    }

    async fn await_finality(
        &self,
        operation_id: &str,
        timeout: Duration,
    ) -> EngineResult<FinalityStatus> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.operation_status(operation_id).await {
                Ok(status) => match status.status.as_str() {
                    "sealed" => return Ok(FinalityStatus::Sealed),
                    "failed" => {
                        let reason = status
                            .reason
                            .unwrap_or_else(|| "no reason reported".to_string());
                        return Ok(FinalityStatus::Failed(reason));
                    }
                    "pending" => {}
                    other => {
                        return Err(EngineError::Unknown(format!(
                            "unrecognized operation status: {other}"
                        )))
                    }
                },
                // Transient transport errors don't conclude the wait; the
                // deadline bounds how long we keep trying.
                Err(e) => warn!("finality poll for {} failed: {}", operation_id, e),
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Ok(FinalityStatus::TimedOut);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn query_escrows(&self, filter: &EscrowFilter) -> EngineResult<Vec<Escrow>> {
        let endpoint = format!("{}/v1/escrows", self.base_url);

        let mut request = self.client.get(&endpoint);
        request = match filter {
            EscrowFilter::All => request,
            EscrowFilter::BySender(sender) => request.query(&[("sender", sender.as_str())]),
            EscrowFilter::ByReceiver(receiver) => {
                request.query(&[("receiver", receiver.as_str())])
            }
            EscrowFilter::ActiveOnly => request.query(&[("state", "active")]),
        };

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Unknown(format!("escrow query failed: {e}")))?
            .error_for_status()
            .map_err(|e| EngineError::Unknown(format!("escrow query rejected: {e}")))?;

        response
            .json::<Vec<Escrow>>()
            .await
            .map_err(|e| EngineError::Unknown(format!("malformed escrow response: {e}")))
    }
}
