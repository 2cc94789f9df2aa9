//! Automation Scheduler Module
//!
//! Single authority for recurring and scheduled actions. Tasks are owned
//! by the scheduler, fire on a fixed-interval tick (not event-driven from
//! the ledger), and dispatch into the escrow lifecycle: recurring payments
//! create escrows, scheduled refunds and auto-claims settle existing ones.
//! The tick also runs the expired-auto sweep so auto-mode escrows are
//! refunded without user action.
//!
//! ## Firing discipline
//!
//! A recurring task's next run advances by one frequency period from its
//! previous next-run time, never from the wall clock at fire time, so N
//! firings land exactly N periods apart. One-shot kinds move to a terminal
//! Fired state after a successful dispatch. Dispatch failures leave the
//! task active for the next tick when the error can clear on its own, and
//! pause the task with a recorded reason when it cannot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::{validate_address, EscrowLifecycle};
use crate::store::{current_timestamp, Address, EscrowId, RefundMode, TokenKind};

// ============================================================================
// TASK MODEL
// ============================================================================

/// What an automation task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Create a fresh escrow to the recipient on every firing
    #[serde(rename = "recurring")]
    RecurringPayment,
    /// Refund an existing escrow once
    #[serde(rename = "scheduled_refund")]
    ScheduledRefund,
    /// Claim an existing escrow once, as its receiver
    #[serde(rename = "auto_claim")]
    AutoClaim,
}

/// Firing cadence for recurring payments.
///
/// Periods are fixed lengths; a month is 30 days. Fixed periods keep the
/// next-run arithmetic exact across any number of firings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Period length in seconds.
    pub fn period_secs(&self) -> u64 {
        match self {
            Frequency::Daily => 86_400,
            Frequency::Weekly => 604_800,
            Frequency::Monthly => 2_592_000,
        }
    }
}

/// Task status. Only Active tasks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    /// Terminal state for one-shot kinds after a successful dispatch
    Fired,
}

/// A recurring or scheduled action owned by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationTask {
    /// Unique task identifier
    pub id: String,
    /// What the task does when due
    pub kind: TaskKind,
    /// Recipient of created escrows (RecurringPayment) or the claiming
    /// receiver (AutoClaim)
    pub recipient: Address,
    /// Amount carried by created escrows
    pub amount: Decimal,
    /// Token denomination
    pub token: TokenKind,
    /// Firing cadence; present iff kind is RecurringPayment
    pub frequency: Option<Frequency>,
    /// Target escrow; present iff kind is ScheduledRefund or AutoClaim
    pub escrow_id: Option<EscrowId>,
    /// Next due time as a Unix timestamp in seconds
    pub next_run: u64,
    /// Current status
    pub status: TaskStatus,
    /// Why the task was paused, when the scheduler paused it
    pub paused_reason: Option<String>,
}

/// Request to register a new automation task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAutomation {
    pub kind: TaskKind,
    pub recipient: Address,
    pub amount: Decimal,
    pub token: TokenKind,
    pub frequency: Option<Frequency>,
    pub escrow_id: Option<EscrowId>,
    /// First due time as a Unix timestamp in seconds
    pub next_run: u64,
}

// ============================================================================
// SCHEDULER IMPLEMENTATION
// ============================================================================

/// Owns the automation task collection and dispatches due tasks on a tick.
pub struct AutomationScheduler {
    lifecycle: Arc<EscrowLifecycle>,
    config: SchedulerConfig,
    /// Map of task id -> task
    tasks: RwLock<HashMap<String, AutomationTask>>,
}

impl AutomationScheduler {
    /// Creates a scheduler with an empty task collection.
    pub fn new(lifecycle: Arc<EscrowLifecycle>, config: SchedulerConfig) -> Self {
        Self {
            lifecycle,
            config,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new task.
    ///
    /// # Returns
    ///
    /// * `Ok(AutomationTask)` - The registered task, with its assigned id
    /// * `Err(EngineError::Validation)` - The request is inconsistent with
    ///   its kind (frequency/escrow pairing) or carries bad fields
    pub async fn create_task(&self, request: NewAutomation) -> EngineResult<AutomationTask> {
        validate_address(&request.recipient)?;
        if request.amount <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "amount must be positive".to_string(),
            ));
        }

        match request.kind {
            TaskKind::RecurringPayment => {
                if request.frequency.is_none() {
                    return Err(EngineError::Validation(
                        "recurring payments require a frequency".to_string(),
                    ));
                }
                if request.escrow_id.is_some() {
                    return Err(EngineError::Validation(
                        "recurring payments do not target an existing escrow".to_string(),
                    ));
                }
            }
            TaskKind::ScheduledRefund | TaskKind::AutoClaim => {
                if request.escrow_id.is_none() {
                    return Err(EngineError::Validation(
                        "scheduled refunds and auto-claims require an escrow id".to_string(),
                    ));
                }
                if request.frequency.is_some() {
                    return Err(EngineError::Validation(
                        "only recurring payments take a frequency".to_string(),
                    ));
                }
            }
        }

        let task = AutomationTask {
            id: Uuid::new_v4().to_string(),
            kind: request.kind,
            recipient: request.recipient,
            amount: request.amount,
            token: request.token,
            frequency: request.frequency,
            escrow_id: request.escrow_id,
            next_run: request.next_run,
            status: TaskStatus::Active,
            paused_reason: None,
        };

        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.clone(), task.clone());
        info!("registered automation task {} ({:?})", task.id, task.kind);
        Ok(task)
    }

    /// Lists all tasks, soonest due first.
    pub async fn list_tasks(&self) -> Vec<AutomationTask> {
        let tasks = self.tasks.read().await;
        let mut result: Vec<AutomationTask> = tasks.values().cloned().collect();
        result.sort_by(|a, b| a.next_run.cmp(&b.next_run).then(a.id.cmp(&b.id)));
        result
    }

    /// Flips a task between Active and Paused.
    ///
    /// Resuming clears the recorded pause reason. Fired tasks are terminal
    /// and cannot be toggled.
    pub async fn toggle_task(&self, id: &str) -> EngineResult<AutomationTask> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        task.status = match task.status {
            TaskStatus::Active => TaskStatus::Paused,
            TaskStatus::Paused => {
                task.paused_reason = None;
                TaskStatus::Active
            }
            TaskStatus::Fired => {
                return Err(EngineError::Validation(
                    "task has already fired".to_string(),
                ))
            }
        };
        Ok(task.clone())
    }

    /// Runs the scheduler loop until the task is aborted.
    ///
    /// The first tick fires immediately, then every `tick_interval_secs`.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        info!(
            "automation scheduler running, tick every {}s",
            self.config.tick_interval_secs
        );

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One scheduler pass: sweep expired auto escrows, then dispatch every
    /// due task.
    pub async fn tick(&self) {
        let swept = self.lifecycle.sweep_expired_auto().await;
        for (id, outcome) in &swept {
            if outcome.is_sealed() {
                info!("sweep refunded escrow {}", id);
            } else if let Some(e) = outcome.error() {
                warn!("sweep refund of escrow {} failed: {}", id, e);
            }
        }

        let now = current_timestamp();
        let due: Vec<AutomationTask> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|task| task.status == TaskStatus::Active && task.next_run <= now)
                .cloned()
                .collect()
        };

        for task in due {
            self.dispatch(task).await;
        }
    }

    /// Dispatches one due task and records the result on the task.
    async fn dispatch(&self, task: AutomationTask) {
        info!("dispatching task {} ({:?})", task.id, task.kind);

        let result = match task.kind {
            TaskKind::RecurringPayment => {
                self.lifecycle
                    .create(
                        &self.config.operator,
                        &task.recipient,
                        task.amount,
                        task.token,
                        self.config.recurring_escrow_duration_secs,
                        RefundMode::Auto,
                    )
                    .await
            }
            // The recipient of a scheduled refund is the escrow's sender;
            // the refund is requested on their behalf so manual-mode
            // escrows accept it.
            TaskKind::ScheduledRefund => match &task.escrow_id {
                Some(escrow_id) => self.lifecycle.refund(escrow_id, &task.recipient).await,
                None => Err(EngineError::Validation(
                    "task has no target escrow".to_string(),
                )),
            },
            TaskKind::AutoClaim => match &task.escrow_id {
                Some(escrow_id) => self.lifecycle.claim(escrow_id, &task.recipient).await,
                None => Err(EngineError::Validation(
                    "task has no target escrow".to_string(),
                )),
            },
        };

        let dispatch_error = match result {
            Ok(outcome) if outcome.is_sealed() => None,
            Ok(outcome) => outcome.error(),
            Err(e) => Some(e),
        };

        let mut tasks = self.tasks.write().await;
        let Some(stored) = tasks.get_mut(&task.id) else {
            return;
        };

        match dispatch_error {
            None => match stored.kind {
                TaskKind::RecurringPayment => {
                    // Advance from the stored next_run, not from now, so a
                    // late tick doesn't drift the cadence.
                    if let Some(frequency) = stored.frequency {
                        stored.next_run += frequency.period_secs();
                        info!(
                            "task {} fired, next run at {}",
                            stored.id, stored.next_run
                        );
                    } else {
                        // create_task guarantees a frequency; a task without
                        // one must not refire at the same time forever.
                        stored.status = TaskStatus::Paused;
                        stored.paused_reason =
                            Some("recurring task has no frequency".to_string());
                    }
                }
                TaskKind::ScheduledRefund | TaskKind::AutoClaim => {
                    stored.status = TaskStatus::Fired;
                    info!("task {} fired", stored.id);
                }
            },
            Some(e) if e.is_retryable() => {
                warn!("task {} dispatch failed, retrying next tick: {}", stored.id, e);
            }
            Some(e) => {
                error!("task {} dispatch failed permanently, pausing: {}", stored.id, e);
                stored.status = TaskStatus::Paused;
                stored.paused_reason = Some(e.to_string());
            }
        }
    }
}
