//! Transaction Runner Module
//!
//! Uniform wrapper around every mutating ledger call: submit the operation,
//! await finality within a configured bound, classify the outcome, and
//! refresh the escrow store when the operation sealed. Callers observe
//! exactly one of Sealed / Failed / TimedOut, never a silent no-op.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{classify_failure, EngineError};
use crate::ledger_client::{FinalityStatus, LedgerClient, OperationDescriptor, OperationId};
use crate::store::EscrowStore;

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// Final classification of one submit/await cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The operation is permanently applied.
    Sealed,
    /// The operation failed; the classified error says why.
    Failed(EngineError),
    /// Finality was not observed within the bound. The operation may still
    /// apply later; reconcile via a store refresh, not a blind resubmit.
    TimedOut,
}

/// Result of running one mutating operation through the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    /// Operation id assigned at submission; `None` when submission itself
    /// failed and nothing reached the ledger.
    pub operation_id: Option<OperationId>,
    /// Final classification
    pub status: OutcomeStatus,
}

impl TransactionOutcome {
    /// Outcome for an operation that never got an id.
    pub fn failed(error: EngineError) -> Self {
        Self {
            operation_id: None,
            status: OutcomeStatus::Failed(error),
        }
    }

    /// Whether the operation sealed.
    pub fn is_sealed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Sealed)
    }

    /// The error carried by a non-sealed outcome, if any.
    pub fn error(&self) -> Option<EngineError> {
        match &self.status {
            OutcomeStatus::Sealed => None,
            OutcomeStatus::Failed(e) => Some(e.clone()),
            OutcomeStatus::TimedOut => Some(EngineError::TimedOut),
        }
    }
}

// ============================================================================
// RUNNER IMPLEMENTATION
// ============================================================================

/// Executes mutating operations through the submit/await/classify protocol.
pub struct TransactionRunner {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<EscrowStore>,
    finality_timeout: Duration,
}

impl TransactionRunner {
    /// Creates a runner over the given ledger and store.
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<EscrowStore>, config: &Config) -> Self {
        Self {
            ledger,
            store,
            finality_timeout: Duration::from_secs(config.engine.finality_timeout_secs),
        }
    }

    /// Runs one operation to a classified outcome.
    ///
    /// On a sealed operation the store is refreshed before returning so the
    /// caller immediately observes the new state. A refresh failure does
    /// not demote the outcome: the operation is applied either way, and the
    /// cache catches up on the next refresh.
    pub async fn run(&self, op: &OperationDescriptor) -> TransactionOutcome {
        let operation_id = match self.ledger.submit(op).await {
            Ok(id) => id,
            Err(e) => {
                warn!("submission failed: {}", e);
                return TransactionOutcome::failed(e);
            }
        };

        let finality = self
            .ledger
            .await_finality(&operation_id, self.finality_timeout)
            .await;

        let status = match finality {
            Ok(FinalityStatus::Sealed) => {
                info!("operation {} sealed", operation_id);
                if let Err(e) = self.store.refresh().await {
                    warn!("store refresh after seal failed: {}", e);
                }
                OutcomeStatus::Sealed
            }
            Ok(FinalityStatus::Failed(reason)) => {
                let classified = classify_failure(&reason);
                warn!("operation {} failed: {} ({})", operation_id, reason, classified);
                OutcomeStatus::Failed(classified)
            }
            Ok(FinalityStatus::TimedOut) => {
                warn!(
                    "operation {} not final within {:?}; state must be reconciled by re-query",
                    operation_id, self.finality_timeout
                );
                OutcomeStatus::TimedOut
            }
            Err(e) => {
                warn!("awaiting finality of {} failed: {}", operation_id, e);
                OutcomeStatus::Failed(e)
            }
        };

        TransactionOutcome {
            operation_id: Some(operation_id),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_error_extraction() {
        let sealed = TransactionOutcome {
            operation_id: Some("op-1".to_string()),
            status: OutcomeStatus::Sealed,
        };
        assert!(sealed.is_sealed());
        assert_eq!(sealed.error(), None);

        let failed = TransactionOutcome::failed(EngineError::AlreadySettled);
        assert!(!failed.is_sealed());
        assert_eq!(failed.operation_id, None);
        assert_eq!(failed.error(), Some(EngineError::AlreadySettled));

        let timed_out = TransactionOutcome {
            operation_id: Some("op-2".to_string()),
            status: OutcomeStatus::TimedOut,
        };
        assert_eq!(timed_out.error(), Some(EngineError::TimedOut));
    }
}
