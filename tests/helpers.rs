//! Shared test helpers for integration tests
//!
//! Provides dummy addresses, a test configuration with fast timeouts, and
//! `MockLedger`, an in-memory ledger that enforces the same transition
//! rules the real ledger does, so policy rejections can be exercised end
//! to end without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use rust_decimal::Decimal;

use escrow_engine::config::{Config, EngineConfig, LedgerConfig, SchedulerConfig};
use escrow_engine::error::{EngineError, EngineResult};
use escrow_engine::ledger_client::{FinalityStatus, LedgerClient, OperationDescriptor, OperationId};
use escrow_engine::store::{
    current_timestamp, Escrow, EscrowFilter, EscrowState, RefundMode, TokenKind,
};
use escrow_engine::EscrowService;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Dummy sender address (8 bytes hex, emulator-style)
pub const DUMMY_SENDER: &str = "0xf8d6e0586b0a20c7";

/// Dummy receiver address
pub const DUMMY_RECEIVER: &str = "0x179b6b1cb6755e31";

/// Dummy scheduler operator address
pub const DUMMY_OPERATOR: &str = "0xe03daebed8ca0615";

/// Dummy third-party address, neither sender nor receiver of anything
#[allow(dead_code)]
pub const DUMMY_OUTSIDER: &str = "0x045a1763c93006ca";

// ============================================================================
// CONFIG AND ESCROW BUILDERS
// ============================================================================

/// Test configuration with fast timeouts so tests never sit idle.
pub fn test_config() -> Config {
    Config {
        ledger: LedgerConfig {
            base_url: "http://127.0.0.1:8888".to_string(),
            request_timeout_secs: 2,
        },
        engine: EngineConfig {
            finality_timeout_secs: 1,
            finality_poll_ms: 20,
        },
        scheduler: SchedulerConfig {
            tick_interval_secs: 1,
            recurring_escrow_duration_secs: 3600,
            operator: DUMMY_OPERATOR.to_string(),
        },
    }
}

/// Generates a random, format-valid 8-byte address.
#[allow(dead_code)]
pub fn random_address() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// An Active escrow expiring `duration_secs` from now.
#[allow(dead_code)]
pub fn make_active_escrow(id: &str, duration_secs: u64, refund_mode: RefundMode) -> Escrow {
    let now = current_timestamp();
    Escrow {
        id: id.to_string(),
        sender: DUMMY_SENDER.to_string(),
        receiver: DUMMY_RECEIVER.to_string(),
        amount: Decimal::new(100_00000000, 8),
        token: TokenKind::Flow,
        expiry: now + duration_secs,
        state: EscrowState::Active,
        refund_mode,
        created_at: now,
    }
}

/// An Active escrow whose expiry already passed.
#[allow(dead_code)]
pub fn make_expired_escrow(id: &str, refund_mode: RefundMode) -> Escrow {
    let now = current_timestamp();
    Escrow {
        id: id.to_string(),
        sender: DUMMY_SENDER.to_string(),
        receiver: DUMMY_RECEIVER.to_string(),
        amount: Decimal::new(100_00000000, 8),
        token: TokenKind::Flow,
        expiry: now.saturating_sub(60),
        state: EscrowState::Active,
        refund_mode,
        created_at: now.saturating_sub(120),
    }
}

/// Builds a service over a fresh `MockLedger` with the test configuration.
#[allow(dead_code)]
pub fn build_service() -> (EscrowService, Arc<MockLedger>) {
    let ledger = Arc::new(MockLedger::new());
    let service = EscrowService::new(&test_config(), ledger.clone());
    (service, ledger)
}

// ============================================================================
// MOCK LEDGER
// ============================================================================

/// In-memory ledger with an authoritative escrow table.
///
/// Operations apply at submission time and their finality result is
/// replayed by `await_finality`, mimicking a ledger that has already
/// ordered the transaction when the client starts polling. Transition
/// rules mirror the real ledger's, including reason strings, so the
/// engine's failure classification sees realistic input.
pub struct MockLedger {
    escrows: Mutex<HashMap<String, Escrow>>,
    operations: Mutex<HashMap<String, FinalityStatus>>,
    next_escrow_id: AtomicU64,
    next_operation_id: AtomicU64,
    /// When set, `submit` fails before anything reaches the table
    fail_submissions: AtomicBool,
    /// When set, operations never finalize within any bound
    stall_finality: AtomicBool,
    /// Artificial delay before finality is reported; widens the window in
    /// which a second operation on the same escrow is concurrent
    finality_delay: Mutex<Duration>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            escrows: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            next_escrow_id: AtomicU64::new(1),
            next_operation_id: AtomicU64::new(1),
            fail_submissions: AtomicBool::new(false),
            stall_finality: AtomicBool::new(false),
            finality_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Inserts a record directly, bypassing the create operation. Lets
    /// tests start from already-expired or terminal states without
    /// sleeping through real durations.
    #[allow(dead_code)]
    pub fn seed_escrow(&self, escrow: Escrow) {
        self.escrows
            .lock()
            .unwrap()
            .insert(escrow.id.clone(), escrow);
    }

    #[allow(dead_code)]
    pub fn escrow(&self, id: &str) -> Option<Escrow> {
        self.escrows.lock().unwrap().get(id).cloned()
    }

    #[allow(dead_code)]
    pub fn escrow_count(&self) -> usize {
        self.escrows.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn set_stall_finality(&self, stall: bool) {
        self.stall_finality.store(stall, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn set_finality_delay(&self, delay: Duration) {
        *self.finality_delay.lock().unwrap() = delay;
    }

    /// Applies an operation to the authoritative table, returning the
    /// finality result the ledger would report.
    fn apply(&self, op: &OperationDescriptor) -> FinalityStatus {
        let now = current_timestamp();
        let mut escrows = self.escrows.lock().unwrap();

        match op {
            OperationDescriptor::CreateEscrow {
                sender,
                receiver,
                amount,
                token,
                expiry,
                refund_mode,
            } => {
                let id = self
                    .next_escrow_id
                    .fetch_add(1, Ordering::SeqCst)
                    .to_string();
                escrows.insert(
                    id.clone(),
                    Escrow {
                        id,
                        sender: sender.clone(),
                        receiver: receiver.clone(),
                        amount: *amount,
                        token: *token,
                        expiry: *expiry,
                        state: EscrowState::Active,
                        refund_mode: *refund_mode,
                        created_at: now,
                    },
                );
                FinalityStatus::Sealed
            }
            OperationDescriptor::ClaimEscrow { id, requester } => {
                let Some(escrow) = escrows.get_mut(id) else {
                    return FinalityStatus::Failed("Escrow not found".to_string());
                };
                if escrow.state != EscrowState::Active {
                    return FinalityStatus::Failed("Escrow is not active".to_string());
                }
                if &escrow.receiver != requester {
                    return FinalityStatus::Failed(
                        "Only the receiver can claim this escrow".to_string(),
                    );
                }
                if now > escrow.expiry {
                    return FinalityStatus::Failed("Escrow has expired".to_string());
                }
                escrow.state = EscrowState::Claimed;
                FinalityStatus::Sealed
            }
            OperationDescriptor::RefundEscrow { id, requester } => {
                let Some(escrow) = escrows.get_mut(id) else {
                    return FinalityStatus::Failed("Escrow not found".to_string());
                };
                if escrow.state != EscrowState::Active {
                    return FinalityStatus::Failed("Escrow is not active".to_string());
                }
                if now <= escrow.expiry {
                    return FinalityStatus::Failed("Escrow has not expired yet".to_string());
                }
                if escrow.refund_mode == RefundMode::Manual && &escrow.sender != requester {
                    return FinalityStatus::Failed(
                        "Only the sender can refund this escrow".to_string(),
                    );
                }
                escrow.state = EscrowState::Refunded;
                FinalityStatus::Sealed
            }
        }
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(&self, op: &OperationDescriptor) -> EngineResult<OperationId> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(EngineError::SubmissionFailed(
                "simulated network failure".to_string(),
            ));
        }

        let result = self.apply(op);
        let operation_id = format!(
            "op-{}",
            self.next_operation_id.fetch_add(1, Ordering::SeqCst)
        );
        self.operations
            .lock()
            .unwrap()
            .insert(operation_id.clone(), result);
        Ok(operation_id)
    }

    async fn await_finality(
        &self,
        operation_id: &str,
        timeout: Duration,
    ) -> EngineResult<FinalityStatus> {
        if self.stall_finality.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Ok(FinalityStatus::TimedOut);
        }

        let delay = *self.finality_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        self.operations
            .lock()
            .unwrap()
            .get(operation_id)
            .cloned()
            .ok_or_else(|| EngineError::Unknown(format!("unknown operation {operation_id}")))
    }

    async fn query_escrows(&self, filter: &EscrowFilter) -> EngineResult<Vec<Escrow>> {
        let escrows = self.escrows.lock().unwrap();
        Ok(escrows
            .values()
            .filter(|escrow| filter.matches(escrow))
            .cloned()
            .collect())
    }
}
