//! Accounting core of a custodial wallet service.
//!
//! Watches an EVM chain and a Solana-style chain for value transfers
//! touching custodial deposit addresses and reconciles them against a
//! ledger of user balances: inbound transfers are credited exactly once,
//! outbound transfers are matched against expected withdrawals or recorded
//! as unauthorized, and a timer-driven sweep converges records stuck in
//! pending.

pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod reconciler;
pub mod types;
pub mod watchers;
