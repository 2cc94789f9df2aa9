//! Escrow Store Module
//!
//! This module holds the escrow data model and the cached projection of
//! escrow records keyed by id. The cache is refreshed by querying the
//! ledger and is rebuildable at any time; the ledger remains the source of
//! truth. The store also owns the per-escrow mutation guard: at most one
//! mutating operation may be in flight per escrow id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::ledger_client::LedgerClient;

// ============================================================================
// DATA MODEL
// ============================================================================

/// Opaque escrow identifier, assigned by the ledger at creation.
pub type EscrowId = String;

/// Account address on the ledger (0x-prefixed, 8 bytes hex).
pub type Address = String;

/// Token denominations an escrow can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "FLOW")]
    Flow,
    #[serde(rename = "USDC")]
    Usdc,
    #[serde(rename = "FUSD")]
    Fusd,
}

impl TokenKind {
    /// Whether this is the ledger's native token.
    pub fn is_native(&self) -> bool {
        matches!(self, TokenKind::Flow)
    }
}

/// Policy for who may trigger the post-expiry fund return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundMode {
    /// Only the sender may trigger the refund.
    Manual,
    /// Any trigger is accepted once expired, including the scheduler sweep.
    Auto,
}

/// Lifecycle state of an escrow. `Claimed` and `Refunded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    Active,
    Claimed,
    Refunded,
}

/// A locked-fund record awaiting claim or refund.
///
/// Records are never deleted; terminal states are retained for history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    /// Unique identifier, assigned by the ledger
    pub id: EscrowId,
    /// Address that funded the escrow
    pub sender: Address,
    /// Address designated to claim the funds
    pub receiver: Address,
    /// Locked amount (fixed-point, 8 decimal places on the wire)
    pub amount: Decimal,
    /// Token denomination of the locked amount
    pub token: TokenKind,
    /// Expiry as a Unix timestamp in seconds
    pub expiry: u64,
    /// Current lifecycle state
    pub state: EscrowState,
    /// Refund trigger policy
    pub refund_mode: RefundMode,
    /// Creation time as a Unix timestamp in seconds
    pub created_at: u64,
}

impl Escrow {
    /// Whether the receiver can still claim at `now`.
    ///
    /// Expiry comparison is strict: an escrow is claimable through the
    /// exact expiry second and refundable only after it.
    pub fn is_claimable(&self, now: u64) -> bool {
        self.state == EscrowState::Active && now <= self.expiry
    }

    /// Whether the escrow is eligible for refund at `now`.
    pub fn is_refundable(&self, now: u64) -> bool {
        self.state == EscrowState::Active && now > self.expiry
    }

    /// Whether the expiry has passed at `now`, regardless of state.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry
    }
}

/// Filter applied when listing or querying escrows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EscrowFilter {
    /// All records, terminal states included
    #[default]
    All,
    /// Records funded by the given address
    BySender(Address),
    /// Records claimable by the given address
    ByReceiver(Address),
    /// Records still in the Active state
    ActiveOnly,
}

impl EscrowFilter {
    /// Whether `escrow` passes this filter.
    pub fn matches(&self, escrow: &Escrow) -> bool {
        match self {
            EscrowFilter::All => true,
            EscrowFilter::BySender(sender) => &escrow.sender == sender,
            EscrowFilter::ByReceiver(receiver) => &escrow.receiver == receiver,
            EscrowFilter::ActiveOnly => escrow.state == EscrowState::Active,
        }
    }
}

/// Aggregate escrow counters surfaced to the presentation layer.
///
/// `expired` counts Active records whose expiry has passed; it overlaps
/// with `active` rather than being a sixth state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscrowStats {
    pub total: usize,
    pub active: usize,
    pub claimed: usize,
    pub refunded: usize,
    pub expired: usize,
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

/// Cached projection of escrow records, keyed by escrow id.
///
/// The map is replaced wholesale on refresh. Reads are served from the
/// cache and never block on ledger calls; callers that need fresh state
/// trigger an explicit [`EscrowStore::refresh`].
pub struct EscrowStore {
    /// Ledger used to rebuild the projection
    ledger: Arc<dyn LedgerClient>,
    /// Map of escrow id -> record
    escrows: RwLock<HashMap<EscrowId, Escrow>>,
    /// Escrow ids with a mutating operation currently in flight.
    ///
    /// A std mutex rather than an async one so the guard can release in
    /// `Drop`; the critical section is a single set operation.
    in_flight: Mutex<HashSet<EscrowId>>,
}

impl EscrowStore {
    /// Creates a new, empty store backed by the given ledger.
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            escrows: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Rebuilds the cached projection from the ledger.
    ///
    /// Terminal records are included; the history view depends on them.
    pub async fn refresh(&self) -> EngineResult<()> {
        let records = self.ledger.query_escrows(&EscrowFilter::All).await?;
        let mut escrows = self.escrows.write().await;
        escrows.clear();
        for escrow in records {
            escrows.insert(escrow.id.clone(), escrow);
        }
        Ok(())
    }

    /// Returns the cached record for `id`, if any.
    pub async fn get(&self, id: &str) -> Option<Escrow> {
        let escrows = self.escrows.read().await;
        escrows.get(id).cloned()
    }

    /// Lists cached records passing `filter`, newest first.
    pub async fn list(&self, filter: &EscrowFilter) -> Vec<Escrow> {
        let escrows = self.escrows.read().await;
        let mut result: Vec<Escrow> = escrows
            .values()
            .filter(|escrow| filter.matches(escrow))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result
    }

    /// Computes aggregate counters over the cached records.
    pub async fn stats(&self) -> EscrowStats {
        let escrows = self.escrows.read().await;
        let now = current_timestamp();
        let mut stats = EscrowStats {
            total: escrows.len(),
            ..EscrowStats::default()
        };
        for escrow in escrows.values() {
            match escrow.state {
                EscrowState::Active => {
                    stats.active += 1;
                    if escrow.is_expired(now) {
                        stats.expired += 1;
                    }
                }
                EscrowState::Claimed => stats.claimed += 1,
                EscrowState::Refunded => stats.refunded += 1,
            }
        }
        stats
    }

    /// Marks `id` as having a mutating operation in flight.
    ///
    /// Returns a guard that releases the slot on drop. A second call for
    /// the same id while a guard is live fails with `OperationInProgress`
    /// rather than queuing, so conflicting concurrent transitions cannot
    /// be submitted.
    pub fn begin_mutation(self: &Arc<Self>, id: &str) -> EngineResult<MutationGuard> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(id.to_string()) {
            return Err(EngineError::OperationInProgress);
        }
        Ok(MutationGuard {
            store: Arc::clone(self),
            id: id.to_string(),
        })
    }
}

/// RAII token for the single-in-flight-per-escrow discipline.
pub struct MutationGuard {
    store: Arc<EscrowStore>,
    id: EscrowId,
}

impl std::fmt::Debug for MutationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationGuard").field("id", &self.id).finish()
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        let mut in_flight = self.store.in_flight.lock().unwrap();
        in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escrow(state: EscrowState, expiry: u64) -> Escrow {
        Escrow {
            id: "1".to_string(),
            sender: "0xf8d6e0586b0a20c7".to_string(),
            receiver: "0x179b6b1cb6755e31".to_string(),
            amount: Decimal::new(100, 0),
            token: TokenKind::Flow,
            expiry,
            state,
            refund_mode: RefundMode::Manual,
            created_at: 0,
        }
    }

    #[test]
    fn claimable_and_refundable_use_strict_expiry() {
        let e = escrow(EscrowState::Active, 1000);
        // At the exact expiry second the escrow is still claimable.
        assert!(e.is_claimable(1000));
        assert!(!e.is_refundable(1000));
        // One second past expiry it flips.
        assert!(!e.is_claimable(1001));
        assert!(e.is_refundable(1001));
    }

    #[test]
    fn terminal_states_are_neither_claimable_nor_refundable() {
        let claimed = escrow(EscrowState::Claimed, 1000);
        assert!(!claimed.is_claimable(500));
        assert!(!claimed.is_refundable(2000));

        let refunded = escrow(EscrowState::Refunded, 1000);
        assert!(!refunded.is_claimable(500));
        assert!(!refunded.is_refundable(2000));
    }

    #[test]
    fn filter_matches_sender_and_receiver() {
        let e = escrow(EscrowState::Active, 1000);
        assert!(EscrowFilter::All.matches(&e));
        assert!(EscrowFilter::BySender("0xf8d6e0586b0a20c7".to_string()).matches(&e));
        assert!(!EscrowFilter::BySender("0x179b6b1cb6755e31".to_string()).matches(&e));
        assert!(EscrowFilter::ByReceiver("0x179b6b1cb6755e31".to_string()).matches(&e));
        assert!(EscrowFilter::ActiveOnly.matches(&e));
        assert!(!EscrowFilter::ActiveOnly.matches(&escrow(EscrowState::Claimed, 1000)));
    }

    #[test]
    fn token_kind_native_flag() {
        assert!(TokenKind::Flow.is_native());
        assert!(!TokenKind::Usdc.is_native());
        assert!(!TokenKind::Fusd.is_native());
    }
}
