//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_service, make_active_escrow, make_expired_escrow, random_address, test_config,
    MockLedger, DUMMY_OPERATOR, DUMMY_OUTSIDER, DUMMY_RECEIVER, DUMMY_SENDER,
};
