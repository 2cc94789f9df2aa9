//! Service Facade Module
//!
//! Bundles the store, lifecycle, and scheduler behind the surface the
//! presentation layer consumes. The facade owns component wiring; callers
//! never touch the runner or the per-escrow guard directly.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::config::Config;
use crate::error::EngineResult;
use crate::ledger_client::LedgerClient;
use crate::lifecycle::EscrowLifecycle;
use crate::runner::{TransactionOutcome, TransactionRunner};
use crate::scheduler::{AutomationScheduler, AutomationTask, NewAutomation};
use crate::store::{
    Escrow, EscrowFilter, EscrowId, EscrowStats, EscrowStore, RefundMode, TokenKind,
};

/// The escrow engine's public surface.
pub struct EscrowService {
    store: Arc<EscrowStore>,
    lifecycle: Arc<EscrowLifecycle>,
    scheduler: Arc<AutomationScheduler>,
}

impl EscrowService {
    /// Wires up the engine components over the given ledger client.
    pub fn new(config: &Config, ledger: Arc<dyn LedgerClient>) -> Self {
        let store = Arc::new(EscrowStore::new(Arc::clone(&ledger)));
        let runner = TransactionRunner::new(ledger, Arc::clone(&store), config);
        let lifecycle = Arc::new(EscrowLifecycle::new(Arc::clone(&store), runner));
        let scheduler = Arc::new(AutomationScheduler::new(
            Arc::clone(&lifecycle),
            config.scheduler.clone(),
        ));

        Self {
            store,
            lifecycle,
            scheduler,
        }
    }

    /// The scheduler, for spawning its run loop.
    pub fn scheduler(&self) -> Arc<AutomationScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Rebuilds the cached escrow projection from the ledger.
    pub async fn refresh(&self) -> EngineResult<()> {
        self.store.refresh().await
    }

    /// Lists cached escrows passing `filter`, newest first.
    pub async fn list_escrows(&self, filter: &EscrowFilter) -> Vec<Escrow> {
        self.store.list(filter).await
    }

    /// Aggregate escrow counters over the cached records.
    pub async fn stats(&self) -> EscrowStats {
        self.store.stats().await
    }

    /// Creates an escrow; see [`EscrowLifecycle::create`].
    pub async fn create_escrow(
        &self,
        sender: &str,
        receiver: &str,
        amount: Decimal,
        token: TokenKind,
        duration_secs: u64,
        refund_mode: RefundMode,
    ) -> EngineResult<TransactionOutcome> {
        self.lifecycle
            .create(sender, receiver, amount, token, duration_secs, refund_mode)
            .await
    }

    /// Claims an escrow; see [`EscrowLifecycle::claim`].
    pub async fn claim_escrow(&self, id: &str, requester: &str) -> EngineResult<TransactionOutcome> {
        self.lifecycle.claim(id, requester).await
    }

    /// Refunds an escrow; see [`EscrowLifecycle::refund`].
    pub async fn refund_escrow(
        &self,
        id: &str,
        requester: &str,
    ) -> EngineResult<TransactionOutcome> {
        self.lifecycle.refund(id, requester).await
    }

    /// Refunds all expired auto-mode escrows; see
    /// [`EscrowLifecycle::sweep_expired_auto`].
    pub async fn sweep_expired_auto(&self) -> Vec<(EscrowId, TransactionOutcome)> {
        self.lifecycle.sweep_expired_auto().await
    }

    /// Lists automation tasks, soonest due first.
    pub async fn list_automations(&self) -> Vec<AutomationTask> {
        self.scheduler.list_tasks().await
    }

    /// Registers an automation task.
    pub async fn create_automation(&self, request: NewAutomation) -> EngineResult<AutomationTask> {
        self.scheduler.create_task(request).await
    }

    /// Flips an automation task between Active and Paused.
    pub async fn toggle_automation(&self, id: &str) -> EngineResult<AutomationTask> {
        self.scheduler.toggle_task(id).await
    }
}
