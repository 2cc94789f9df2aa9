//! Escrow Engine Service
//!
//! Service binary for the escrow lifecycle engine. Wires the HTTP ledger
//! client, the cached escrow store, and the automation scheduler together,
//! then runs until shutdown.
//!
//! ## Overview
//!
//! The service:
//! 1. Loads configuration from a TOML file
//! 2. Connects to the ledger access node over its REST API
//! 3. Builds the initial escrow projection
//! 4. Runs the scheduler tick loop in the background (due automation
//!    tasks plus the expired-auto refund sweep)
//! 5. Serves the engine facade until interrupted

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use escrow_engine::{Config, EscrowService, HttpLedgerClient};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting escrow engine service");

    // Load configuration from config/escrowd.toml
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let ledger = Arc::new(HttpLedgerClient::new(&config)?);
    let service = Arc::new(EscrowService::new(&config, ledger));

    // Build the initial projection; a cold cache is not fatal, the next
    // refresh or scheduler tick rebuilds it.
    if let Err(e) = service.refresh().await {
        warn!("initial escrow refresh failed: {}", e);
    } else {
        let stats = service.stats().await;
        info!(
            "escrow projection ready: {} total, {} active, {} expired",
            stats.total, stats.active, stats.expired
        );
    }

    // Start the background scheduler loop
    info!("Starting automation scheduler");
    let scheduler = service.scheduler();
    tokio::spawn(async move {
        scheduler.run().await;
    });

    // Run until shutdown
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");

    Ok(())
}
