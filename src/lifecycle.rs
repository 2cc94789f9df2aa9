//! Escrow Lifecycle Module
//!
//! This module executes the four mutating escrow operations (create,
//! claim, refund, and the expired-auto sweep) against the store and the
//! ledger. Client-side checks are advisory and fail fast with the same
//! taxonomy the ledger uses; the ledger's own enforcement at finality is
//! authoritative.
//!
//! ## State machine
//!
//! An escrow transitions exactly once, from Active to Claimed or from
//! Active to Refunded, never back. Claims are accepted through the exact
//! expiry second; refunds strictly after it. Manual-mode refunds are
//! sender-only; auto-mode escrows accept any trigger once expired, which
//! is what lets the scheduler sweep them.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::ledger_client::OperationDescriptor;
use crate::runner::{TransactionOutcome, TransactionRunner};
use crate::store::{
    current_timestamp, Escrow, EscrowFilter, EscrowId, EscrowState, EscrowStore, RefundMode,
    TokenKind,
};

/// Validates the format of a ledger account address.
///
/// Addresses are 0x-prefixed 8-byte hex strings (16 hex characters).
///
/// # Arguments
///
/// * `address` - Address string to validate
///
/// # Returns
///
/// * `Ok(())` - Address format is valid
/// * `Err(EngineError::Validation)` - Address format is invalid
pub fn validate_address(address: &str) -> EngineResult<()> {
    let stripped = address.strip_prefix("0x").ok_or_else(|| {
        EngineError::Validation(format!("address '{address}' must be 0x-prefixed"))
    })?;

    if stripped.len() != 16 {
        return Err(EngineError::Validation(format!(
            "address '{address}' must be 8 bytes (16 hex characters)"
        )));
    }

    hex::decode(stripped).map_err(|_| {
        EngineError::Validation(format!("address '{address}' is not valid hex"))
    })?;

    Ok(())
}

/// Executes escrow operations, enforcing the state machine client-side and
/// serializing mutations per escrow id through the store's guard.
pub struct EscrowLifecycle {
    store: Arc<EscrowStore>,
    runner: TransactionRunner,
}

impl EscrowLifecycle {
    /// Creates a lifecycle executor over the given store and runner.
    pub fn new(store: Arc<EscrowStore>, runner: TransactionRunner) -> Self {
        Self { store, runner }
    }

    /// Locks `amount` from `sender` into a new escrow for `receiver`.
    ///
    /// The expiry is computed as now + `duration_secs`. The ledger
    /// operation atomically withdraws the funds and registers the record;
    /// on failure nothing is withdrawn and no state changes client-side.
    ///
    /// # Arguments
    ///
    /// * `sender` - Address funding the escrow
    /// * `receiver` - Address designated to claim
    /// * `amount` - Amount to lock, must be positive
    /// * `token` - Token denomination
    /// * `duration_secs` - Seconds from now until expiry, must be positive
    /// * `refund_mode` - Post-expiry refund trigger policy
    pub async fn create(
        &self,
        sender: &str,
        receiver: &str,
        amount: Decimal,
        token: TokenKind,
        duration_secs: u64,
        refund_mode: RefundMode,
    ) -> EngineResult<TransactionOutcome> {
        validate_address(sender)?;
        validate_address(receiver)?;
        if sender == receiver {
            return Err(EngineError::Validation(
                "sender and receiver must differ".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if duration_secs == 0 {
            return Err(EngineError::Validation(
                "duration must be positive".to_string(),
            ));
        }

        let expiry = current_timestamp() + duration_secs;

        // Amounts travel as fixed-point values with 8 decimal places.
        let mut amount = amount;
        amount.rescale(8);

        let op = OperationDescriptor::CreateEscrow {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            token,
            expiry,
            refund_mode,
        };

        info!(
            "creating escrow: {} -> {} ({} {:?}, expires {})",
            sender, receiver, amount, token, expiry
        );
        Ok(self.runner.run(&op).await)
    }

    /// Claims an active escrow for its receiver.
    pub async fn claim(&self, id: &str, requester: &str) -> EngineResult<TransactionOutcome> {
        let _guard = self.store.begin_mutation(id)?;

        let escrow = self.lookup(id).await?;
        if escrow.state != EscrowState::Active {
            return Err(EngineError::AlreadySettled);
        }
        if escrow.receiver != requester {
            return Err(EngineError::NotReceiver);
        }
        if current_timestamp() > escrow.expiry {
            return Err(EngineError::Expired);
        }

        let op = OperationDescriptor::ClaimEscrow {
            id: id.to_string(),
            requester: requester.to_string(),
        };

        info!("claiming escrow {} for {}", id, requester);
        Ok(self.runner.run(&op).await)
    }

    /// Refunds an expired escrow back to its sender.
    pub async fn refund(&self, id: &str, requester: &str) -> EngineResult<TransactionOutcome> {
        let _guard = self.store.begin_mutation(id)?;

        let escrow = self.lookup(id).await?;
        if escrow.state != EscrowState::Active {
            return Err(EngineError::AlreadySettled);
        }
        if current_timestamp() <= escrow.expiry {
            return Err(EngineError::NotExpired);
        }
        if escrow.refund_mode == RefundMode::Manual && escrow.sender != requester {
            return Err(EngineError::NotSender);
        }

        let op = OperationDescriptor::RefundEscrow {
            id: id.to_string(),
            requester: requester.to_string(),
        };

        info!("refunding escrow {} for {}", id, requester);
        Ok(self.runner.run(&op).await)
    }

    /// Refunds every expired auto-mode escrow, independently per id.
    ///
    /// One failed refund does not abort the rest; each escrow reports its
    /// own outcome. Running the sweep again immediately finds nothing
    /// eligible, because refunded records are no longer Active.
    pub async fn sweep_expired_auto(&self) -> Vec<(EscrowId, TransactionOutcome)> {
        if let Err(e) = self.store.refresh().await {
            warn!("store refresh before sweep failed, sweeping cached view: {}", e);
        }

        let now = current_timestamp();
        let eligible: Vec<Escrow> = self
            .store
            .list(&EscrowFilter::ActiveOnly)
            .await
            .into_iter()
            .filter(|escrow| escrow.refund_mode == RefundMode::Auto && escrow.is_refundable(now))
            .collect();

        if eligible.is_empty() {
            return Vec::new();
        }
        info!("sweeping {} expired auto-refund escrow(s)", eligible.len());

        let refunds = eligible.into_iter().map(|escrow| async move {
            let id = escrow.id.clone();
            let outcome = match self.refund(&escrow.id, &escrow.sender).await {
                Ok(outcome) => outcome,
                Err(e) => TransactionOutcome::failed(e),
            };
            (id, outcome)
        });

        futures::future::join_all(refunds).await
    }

    /// Reads an escrow from the cache, refreshing once when it is missing.
    async fn lookup(&self, id: &str) -> EngineResult<Escrow> {
        if let Some(escrow) = self.store.get(id).await {
            return Ok(escrow);
        }
        self.store.refresh().await?;
        self.store
            .get(id)
            .await
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_format_validation() {
        assert!(validate_address("0xf8d6e0586b0a20c7").is_ok());
        assert!(validate_address("0x179b6b1cb6755e31").is_ok());

        // Missing prefix
        assert!(validate_address("f8d6e0586b0a20c7").is_err());
        // Too short
        assert!(validate_address("0xf8d6e0").is_err());
        // Too long
        assert!(validate_address("0xf8d6e0586b0a20c7ff").is_err());
        // Not hex
        assert!(validate_address("0xzzzzzzzzzzzzzzzz").is_err());
        assert!(validate_address("").is_err());
    }
}
