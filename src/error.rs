//! Engine Error Taxonomy
//!
//! Every mutating operation in the engine resolves to exactly one of the
//! error kinds below, whether the rejection happened client-side (input
//! validation, cache lookups, the per-escrow mutation guard) or ledger-side
//! (policy rejections reported with a failure reason at finality).
//!
//! The split that matters operationally is retryable vs terminal:
//! retryable errors leave an automation task active so the next tick tries
//! again, terminal errors pause the task until a user intervenes.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Typed outcome of a failed engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bad input caught before anything was submitted to the ledger.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The ledger never accepted the operation (network or signing issue).
    /// The operation was not submitted; the caller may retry.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// No escrow with the given id is known to the ledger.
    #[error("escrow not found: {0}")]
    NotFound(String),

    /// Only the designated receiver may claim an escrow.
    #[error("requester is not the escrow receiver")]
    NotReceiver,

    /// Only the original sender may refund a manual-mode escrow.
    #[error("requester is not the escrow sender")]
    NotSender,

    /// The escrow expired; claims are no longer accepted.
    #[error("escrow has expired")]
    Expired,

    /// The escrow has not expired yet; refunds are not accepted.
    #[error("escrow has not expired yet")]
    NotExpired,

    /// The escrow already reached a terminal state (Claimed or Refunded).
    #[error("escrow is already settled")]
    AlreadySettled,

    /// Another mutating operation on the same escrow is still in flight.
    #[error("another operation on this escrow is in progress")]
    OperationInProgress,

    /// Finality was not observed within the configured bound. The submitted
    /// operation may still apply; callers must reconcile by re-querying
    /// rather than resubmitting blindly.
    #[error("finality not observed within the configured timeout")]
    TimedOut,

    /// Unclassified ledger error; the reason is passed through verbatim.
    #[error("ledger error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Whether the condition can clear on its own, making a later retry of
    /// the same operation worthwhile.
    ///
    /// `NotExpired` is retryable because time passing is exactly what the
    /// caller is waiting for. Policy rejections tied to identity or a
    /// terminal state never clear and are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SubmissionFailed(_)
                | EngineError::TimedOut
                | EngineError::Unknown(_)
                | EngineError::OperationInProgress
                | EngineError::NotExpired
        )
    }
}

/// Classifies a ledger failure reason into the engine taxonomy.
///
/// Ledger rejections arrive as free-form reason strings at finality. The
/// known policy rejections are recognized by substring; anything else is
/// passed through as [`EngineError::Unknown`].
///
/// # Arguments
///
/// * `reason` - The failure reason reported by the ledger
pub fn classify_failure(reason: &str) -> EngineError {
    let lowered = reason.to_ascii_lowercase();

    // "not expired" must be checked before "expired".
    if lowered.contains("not found") {
        EngineError::NotFound(reason.to_string())
    } else if lowered.contains("not active") || lowered.contains("already settled") {
        EngineError::AlreadySettled
    } else if lowered.contains("not expired") {
        EngineError::NotExpired
    } else if lowered.contains("expired") {
        EngineError::Expired
    } else if lowered.contains("receiver") {
        EngineError::NotReceiver
    } else if lowered.contains("sender") {
        EngineError::NotSender
    } else {
        EngineError::Unknown(reason.to_string())
    }
}
